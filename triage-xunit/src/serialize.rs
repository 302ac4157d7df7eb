// Copyright (c) The autotriage Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Serialize a `Report`.

use crate::{
    NonSuccessKind, Output, Property, Report, SerializeError, Testcase, TestcaseStatus, Testsuite,
};
use quick_xml::{
    Writer,
    events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
};
use std::{io, time::Duration};

pub(crate) static TESTSUITES_TAG: &str = "testsuites";
pub(crate) static TESTSUITE_TAG: &str = "testsuite";
pub(crate) static TESTCASE_TAG: &str = "testcase";
pub(crate) static PROPERTIES_TAG: &str = "properties";
pub(crate) static PROPERTY_TAG: &str = "property";
pub(crate) static FAILURE_TAG: &str = "failure";
pub(crate) static ERROR_TAG: &str = "error";
pub(crate) static SKIPPED_TAG: &str = "skipped";
pub(crate) static SYSTEM_OUT_TAG: &str = "system-out";
pub(crate) static SYSTEM_ERR_TAG: &str = "system-err";

pub(crate) fn serialize_report(
    report: &Report,
    writer: impl io::Write,
) -> Result<(), SerializeError> {
    let mut writer = Writer::new_with_indent(writer, b' ', 4);

    let decl = BytesDecl::new("1.0", Some("UTF-8"), None);
    writer.write_event(Event::Decl(decl))?;

    serialize_report_impl(report, &mut writer)?;

    // Add a trailing newline.
    writer.write_indent()?;
    Ok(())
}

fn serialize_report_impl(report: &Report, writer: &mut Writer<impl io::Write>) -> io::Result<()> {
    // Use the destructuring syntax to ensure that all fields are handled.
    let Report { name, testsuites } = report;

    let mut testsuites_tag = BytesStart::new(TESTSUITES_TAG);
    if let Some(name) = name {
        testsuites_tag.push_attribute(("name", name.as_str()));
    }
    let (tests, failures, errors) = testsuites.iter().fold((0, 0, 0), |acc, suite| {
        (
            acc.0 + suite.tests,
            acc.1 + suite.failures,
            acc.2 + suite.errors,
        )
    });
    testsuites_tag.push_attribute(("tests", tests.to_string().as_str()));
    testsuites_tag.push_attribute(("failures", failures.to_string().as_str()));
    testsuites_tag.push_attribute(("errors", errors.to_string().as_str()));
    writer.write_event(Event::Start(testsuites_tag))?;

    for testsuite in testsuites {
        serialize_testsuite(testsuite, writer)?;
    }

    serialize_end_tag(TESTSUITES_TAG, writer)
}

fn serialize_testsuite(testsuite: &Testsuite, writer: &mut Writer<impl io::Write>) -> io::Result<()> {
    let Testsuite {
        name,
        tests,
        failures,
        errors,
        skipped,
        disabled,
        timestamp,
        time,
        properties,
        has_properties,
        testcases,
        system_out,
        extra,
    } = testsuite;

    let mut testsuite_tag = BytesStart::new(TESTSUITE_TAG);
    if let Some(name) = name {
        testsuite_tag.push_attribute(("name", name.as_str()));
    }
    for (key, count) in [
        ("tests", tests),
        ("failures", failures),
        ("errors", errors),
        ("skipped", skipped),
        ("disabled", disabled),
    ] {
        testsuite_tag.push_attribute((key, count.to_string().as_str()));
    }
    if let Some(time) = time {
        testsuite_tag.push_attribute(("time", serialize_time(time).as_str()));
    }
    if let Some(timestamp) = timestamp {
        testsuite_tag.push_attribute(("timestamp", timestamp.as_str()));
    }
    for (k, v) in extra {
        testsuite_tag.push_attribute((k.as_str(), v.as_str()));
    }

    writer.write_event(Event::Start(testsuite_tag))?;

    if *has_properties || !properties.is_empty() {
        serialize_empty_start_tag(PROPERTIES_TAG, writer)?;
        for property in properties {
            serialize_property(property, writer)?;
        }
        serialize_end_tag(PROPERTIES_TAG, writer)?;
    }

    for testcase in testcases {
        serialize_testcase(testcase, writer)?;
    }

    if let Some(system_out) = system_out {
        serialize_output(system_out, SYSTEM_OUT_TAG, writer)?;
    }

    serialize_end_tag(TESTSUITE_TAG, writer)
}

fn serialize_property(property: &Property, writer: &mut Writer<impl io::Write>) -> io::Result<()> {
    let mut property_tag = BytesStart::new(PROPERTY_TAG);
    property_tag.push_attribute(("name", property.name.as_str()));
    property_tag.push_attribute(("value", property.value.as_str()));

    writer.write_event(Event::Empty(property_tag))
}

fn serialize_testcase(testcase: &Testcase, writer: &mut Writer<impl io::Write>) -> io::Result<()> {
    let Testcase {
        name,
        classname,
        time,
        status,
        system_out,
        system_err,
        extra,
    } = testcase;

    let mut testcase_tag = BytesStart::new(TESTCASE_TAG);
    testcase_tag.push_attribute(("name", name.as_str()));
    if let Some(classname) = classname {
        testcase_tag.push_attribute(("classname", classname.as_str()));
    }
    if let Some(time) = time {
        testcase_tag.push_attribute(("time", serialize_time(time).as_str()));
    }
    for (k, v) in extra {
        testcase_tag.push_attribute((k.as_str(), v.as_str()));
    }

    if matches!(status, TestcaseStatus::Success) && system_out.is_none() && system_err.is_none() {
        return writer.write_event(Event::Empty(testcase_tag));
    }

    writer.write_event(Event::Start(testcase_tag))?;

    match status {
        TestcaseStatus::Success => {}
        TestcaseStatus::NonSuccess {
            kind,
            message,
            ty,
            description,
        } => {
            let tag_name = match kind {
                NonSuccessKind::Failure => FAILURE_TAG,
                NonSuccessKind::Error => ERROR_TAG,
            };
            serialize_status(
                message.as_deref(),
                ty.as_deref(),
                description.as_deref(),
                tag_name,
                writer,
            )?;
        }
        TestcaseStatus::Skipped {
            message,
            description,
        } => {
            serialize_status(
                message.as_deref(),
                None,
                description.as_deref(),
                SKIPPED_TAG,
                writer,
            )?;
        }
    }

    if let Some(system_out) = system_out {
        serialize_output(system_out, SYSTEM_OUT_TAG, writer)?;
    }
    if let Some(system_err) = system_err {
        serialize_output(system_err, SYSTEM_ERR_TAG, writer)?;
    }

    serialize_end_tag(TESTCASE_TAG, writer)
}

fn serialize_status(
    message: Option<&str>,
    ty: Option<&str>,
    description: Option<&str>,
    tag_name: &'static str,
    writer: &mut Writer<impl io::Write>,
) -> io::Result<()> {
    let mut tag = BytesStart::new(tag_name);
    if let Some(message) = message {
        tag.push_attribute(("message", message));
    }
    if let Some(ty) = ty {
        tag.push_attribute(("type", ty));
    }

    match description {
        Some(description) => {
            writer.write_event(Event::Start(tag))?;
            let description = Output::new(description);
            writer.write_event(Event::Text(BytesText::new(description.as_str())))?;
            serialize_end_tag(tag_name, writer)
        }
        None => writer.write_event(Event::Empty(tag)),
    }
}

fn serialize_output(
    output: &Output,
    tag_name: &'static str,
    writer: &mut Writer<impl io::Write>,
) -> io::Result<()> {
    serialize_empty_start_tag(tag_name, writer)?;
    writer.write_event(Event::Text(BytesText::new(output.as_str())))?;
    serialize_end_tag(tag_name, writer)
}

fn serialize_empty_start_tag(
    tag_name: &'static str,
    writer: &mut Writer<impl io::Write>,
) -> io::Result<()> {
    writer.write_event(Event::Start(BytesStart::new(tag_name)))
}

fn serialize_end_tag(tag_name: &'static str, writer: &mut Writer<impl io::Write>) -> io::Result<()> {
    writer.write_event(Event::End(BytesEnd::new(tag_name)))
}

// Serialize time as seconds with 3 decimal points.
fn serialize_time(time: &Duration) -> String {
    format!("{:.3}", time.as_secs_f64())
}

// Copyright (c) The autotriage Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Read a `Report` from XML.

use crate::{
    DeserializeError, NonSuccessKind, Output, Property, Testcase, TestcaseStatus, Testsuite,
    serialize::{
        ERROR_TAG, FAILURE_TAG, PROPERTIES_TAG, PROPERTY_TAG, SKIPPED_TAG, SYSTEM_ERR_TAG,
        SYSTEM_OUT_TAG, TESTCASE_TAG, TESTSUITE_TAG, TESTSUITES_TAG,
    },
};
use indexmap::IndexMap;
use quick_xml::{
    Reader,
    events::{BytesStart, Event},
};
use std::{str::FromStr, time::Duration};

/// A report read with per-testsuite error isolation.
///
/// Returned by [`Report::deserialize_lenient`](crate::Report::deserialize_lenient).
#[derive(Debug)]
pub struct DeserializedReport {
    /// The `name` attribute of the `<testsuites>` element, if any.
    pub name: Option<String>,

    /// One entry per `<testsuite>` element, in document order.
    pub testsuites: Vec<Result<Testsuite, DeserializeError>>,
}

type XmlReader<'i> = Reader<&'i [u8]>;

pub(crate) fn deserialize_report(xml: &str) -> Result<DeserializedReport, DeserializeError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    loop {
        match next_event(&mut reader)? {
            Event::Start(start) => {
                return match start.local_name().as_ref() {
                    name if name == TESTSUITES_TAG.as_bytes() => {
                        let mut attrs = read_attributes(&start)?;
                        let testsuites = read_testsuites(&mut reader)?;
                        Ok(DeserializedReport {
                            name: attrs.shift_remove("name"),
                            testsuites,
                        })
                    }
                    name if name == TESTSUITE_TAG.as_bytes() => Ok(DeserializedReport {
                        name: None,
                        testsuites: vec![read_testsuite(&mut reader, &start, false)?],
                    }),
                    _ => Err(DeserializeError::NoTestsuites),
                };
            }
            Event::Empty(start) => {
                return match start.local_name().as_ref() {
                    name if name == TESTSUITES_TAG.as_bytes() => {
                        let mut attrs = read_attributes(&start)?;
                        Ok(DeserializedReport {
                            name: attrs.shift_remove("name"),
                            testsuites: Vec::new(),
                        })
                    }
                    name if name == TESTSUITE_TAG.as_bytes() => Ok(DeserializedReport {
                        name: None,
                        testsuites: vec![read_testsuite(&mut reader, &start, true)?],
                    }),
                    _ => Err(DeserializeError::NoTestsuites),
                };
            }
            Event::Eof => return Err(DeserializeError::NoTestsuites),
            // Declarations, comments, processing instructions and doctypes.
            _ => {}
        }
    }
}

fn read_testsuites(
    reader: &mut XmlReader<'_>,
) -> Result<Vec<Result<Testsuite, DeserializeError>>, DeserializeError> {
    let mut testsuites = Vec::new();
    loop {
        match next_event(reader)? {
            Event::Start(start) if start.local_name().as_ref() == TESTSUITE_TAG.as_bytes() => {
                testsuites.push(read_testsuite(reader, &start, false)?);
            }
            Event::Empty(start) if start.local_name().as_ref() == TESTSUITE_TAG.as_bytes() => {
                testsuites.push(read_testsuite(reader, &start, true)?);
            }
            Event::Start(start) => skip_element(reader, &start)?,
            Event::End(_) => return Ok(testsuites),
            Event::Eof => {
                return Err(DeserializeError::UnexpectedEof {
                    element: TESTSUITES_TAG,
                });
            }
            _ => {}
        }
    }
}

/// Attribute errors within a testsuite, recorded while the rest of the testsuite is read so
/// the reader stays positioned correctly for the next sibling.
#[derive(Default)]
struct InvalidAttributes {
    first: Option<DeserializeError>,
}

impl InvalidAttributes {
    fn record(&mut self, err: DeserializeError) {
        self.first.get_or_insert(err);
    }

    fn into_result<T>(self, value: T) -> Result<T, DeserializeError> {
        match self.first {
            Some(err) => Err(err),
            None => Ok(value),
        }
    }
}

/// Reads one testsuite. The outer result carries errors fatal to the document, the inner one
/// errors confined to this testsuite.
fn read_testsuite(
    reader: &mut XmlReader<'_>,
    start: &BytesStart<'_>,
    empty: bool,
) -> Result<Result<Testsuite, DeserializeError>, DeserializeError> {
    let mut invalid = InvalidAttributes::default();
    let mut attrs = read_attributes(start)?;

    let mut testsuite = Testsuite::default();
    testsuite.name = attrs.shift_remove("name");
    testsuite.tests = take_parsed(&mut attrs, TESTSUITE_TAG, "tests", &mut invalid).unwrap_or(0);
    testsuite.failures =
        take_parsed(&mut attrs, TESTSUITE_TAG, "failures", &mut invalid).unwrap_or(0);
    testsuite.errors = take_parsed(&mut attrs, TESTSUITE_TAG, "errors", &mut invalid).unwrap_or(0);
    testsuite.skipped =
        take_parsed(&mut attrs, TESTSUITE_TAG, "skipped", &mut invalid).unwrap_or(0);
    testsuite.disabled =
        take_parsed(&mut attrs, TESTSUITE_TAG, "disabled", &mut invalid).unwrap_or(0);
    testsuite.time = take_time(&mut attrs, TESTSUITE_TAG, &mut invalid);
    testsuite.timestamp = attrs.shift_remove("timestamp");
    testsuite.extra = attrs;

    if empty {
        return Ok(invalid.into_result(testsuite));
    }

    loop {
        match next_event(reader)? {
            Event::Start(start) => match start.local_name().as_ref() {
                name if name == PROPERTIES_TAG.as_bytes() => {
                    testsuite.has_properties = true;
                    testsuite.properties = read_properties(reader)?;
                }
                name if name == TESTCASE_TAG.as_bytes() => {
                    let testcase = read_testcase(reader, &start, false, &mut invalid)?;
                    testsuite.testcases.push(testcase);
                }
                name if name == SYSTEM_OUT_TAG.as_bytes() => {
                    testsuite.system_out = Some(Output::new(read_text(reader, SYSTEM_OUT_TAG)?));
                }
                _ => skip_element(reader, &start)?,
            },
            Event::Empty(start) => match start.local_name().as_ref() {
                name if name == PROPERTIES_TAG.as_bytes() => testsuite.has_properties = true,
                name if name == TESTCASE_TAG.as_bytes() => {
                    let testcase = read_testcase(reader, &start, true, &mut invalid)?;
                    testsuite.testcases.push(testcase);
                }
                _ => {}
            },
            Event::End(_) => return Ok(invalid.into_result(testsuite)),
            Event::Eof => {
                return Err(DeserializeError::UnexpectedEof {
                    element: TESTSUITE_TAG,
                });
            }
            _ => {}
        }
    }
}

fn read_properties(reader: &mut XmlReader<'_>) -> Result<Vec<Property>, DeserializeError> {
    let mut properties = Vec::new();
    loop {
        match next_event(reader)? {
            Event::Empty(start) if start.local_name().as_ref() == PROPERTY_TAG.as_bytes() => {
                properties.push(read_property(&start)?);
            }
            Event::Start(start) => {
                if start.local_name().as_ref() == PROPERTY_TAG.as_bytes() {
                    properties.push(read_property(&start)?);
                }
                skip_element(reader, &start)?;
            }
            Event::End(_) => return Ok(properties),
            Event::Eof => {
                return Err(DeserializeError::UnexpectedEof {
                    element: PROPERTIES_TAG,
                });
            }
            _ => {}
        }
    }
}

fn read_property(start: &BytesStart<'_>) -> Result<Property, DeserializeError> {
    let mut attrs = read_attributes(start)?;
    Ok(Property::new(
        attrs.shift_remove("name").unwrap_or_default(),
        attrs.shift_remove("value").unwrap_or_default(),
    ))
}

fn read_testcase(
    reader: &mut XmlReader<'_>,
    start: &BytesStart<'_>,
    empty: bool,
    invalid: &mut InvalidAttributes,
) -> Result<Testcase, DeserializeError> {
    let mut attrs = read_attributes(start)?;
    let mut testcase = Testcase::new(
        attrs.shift_remove("name").unwrap_or_default(),
        TestcaseStatus::Success,
    );
    testcase.classname = attrs.shift_remove("classname");
    testcase.time = take_time(&mut attrs, TESTCASE_TAG, invalid);
    testcase.extra = attrs;

    if empty {
        return Ok(testcase);
    }

    loop {
        let (start, empty) = match next_event(reader)? {
            Event::Start(start) => (start, false),
            Event::Empty(start) => (start, true),
            Event::End(_) => return Ok(testcase),
            Event::Eof => {
                return Err(DeserializeError::UnexpectedEof {
                    element: TESTCASE_TAG,
                });
            }
            _ => continue,
        };

        let name = start.local_name();
        let name = name.as_ref();
        if name == FAILURE_TAG.as_bytes() || name == ERROR_TAG.as_bytes() {
            let kind = if name == FAILURE_TAG.as_bytes() {
                NonSuccessKind::Failure
            } else {
                NonSuccessKind::Error
            };
            let mut attrs = read_attributes(&start)?;
            let description = if empty {
                None
            } else {
                Some(read_text(reader, FAILURE_TAG)?)
            };
            testcase.status = TestcaseStatus::NonSuccess {
                kind,
                message: attrs.shift_remove("message"),
                ty: attrs.shift_remove("type"),
                description: description.filter(|text| !text.is_empty()),
            };
        } else if name == SKIPPED_TAG.as_bytes() {
            let mut attrs = read_attributes(&start)?;
            let description = if empty {
                None
            } else {
                Some(read_text(reader, SKIPPED_TAG)?)
            };
            // A failure recorded in the same testcase takes precedence.
            if !matches!(testcase.status, TestcaseStatus::NonSuccess { .. }) {
                testcase.status = TestcaseStatus::Skipped {
                    message: attrs.shift_remove("message"),
                    description: description.filter(|text| !text.is_empty()),
                };
            }
        } else if name == SYSTEM_OUT_TAG.as_bytes() {
            if !empty {
                testcase.system_out = Some(Output::new(read_text(reader, SYSTEM_OUT_TAG)?));
            }
        } else if name == SYSTEM_ERR_TAG.as_bytes() {
            if !empty {
                testcase.system_err = Some(Output::new(read_text(reader, SYSTEM_ERR_TAG)?));
            }
        } else if !empty {
            skip_element(reader, &start)?;
        }
    }
}

/// Reads the text and CDATA content of the current element up to and including its end tag.
fn read_text(reader: &mut XmlReader<'_>, element: &'static str) -> Result<String, DeserializeError> {
    let mut text = String::new();
    loop {
        match next_event(reader)? {
            Event::Text(chunk) => {
                let chunk = chunk.unescape().map_err(|err| xml_error(reader, err))?;
                text.push_str(&chunk);
            }
            Event::CData(chunk) => {
                text.push_str(std::str::from_utf8(&chunk)?);
            }
            Event::Start(start) => skip_element(reader, &start)?,
            Event::End(_) => return Ok(text),
            Event::Eof => return Err(DeserializeError::UnexpectedEof { element }),
            _ => {}
        }
    }
}

fn skip_element(reader: &mut XmlReader<'_>, start: &BytesStart<'_>) -> Result<(), DeserializeError> {
    reader
        .read_to_end(start.name())
        .map(|_| ())
        .map_err(|err| xml_error(reader, err))
}

fn read_attributes(start: &BytesStart<'_>) -> Result<IndexMap<String, String>, DeserializeError> {
    let mut attrs = IndexMap::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|err| DeserializeError::Xml {
            position: 0,
            err: err.into(),
        })?;
        let key = std::str::from_utf8(attr.key.as_ref())?.to_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| DeserializeError::Xml { position: 0, err })?;
        attrs.insert(key, value.into_owned());
    }
    Ok(attrs)
}

fn take_parsed<T>(
    attrs: &mut IndexMap<String, String>,
    element: &'static str,
    attribute: &str,
    invalid: &mut InvalidAttributes,
) -> Option<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let value = attrs.shift_remove(attribute)?;
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(err) => {
            invalid.record(DeserializeError::InvalidAttribute {
                element,
                attribute: attribute.to_owned(),
                value,
                err: Box::new(err),
            });
            None
        }
    }
}

fn take_time(
    attrs: &mut IndexMap<String, String>,
    element: &'static str,
    invalid: &mut InvalidAttributes,
) -> Option<Duration> {
    let secs: f64 = take_parsed(attrs, element, "time", invalid)?;
    match Duration::try_from_secs_f64(secs) {
        Ok(time) => Some(time),
        Err(err) => {
            invalid.record(DeserializeError::InvalidAttribute {
                element,
                attribute: "time".to_owned(),
                value: secs.to_string(),
                err: Box::new(err),
            });
            None
        }
    }
}

fn next_event<'i>(reader: &mut XmlReader<'i>) -> Result<Event<'i>, DeserializeError> {
    match reader.read_event() {
        Ok(event) => Ok(event),
        Err(err) => Err(xml_error(reader, err)),
    }
}

fn xml_error(reader: &XmlReader<'_>, err: quick_xml::Error) -> DeserializeError {
    DeserializeError::Xml {
        position: reader.buffer_position(),
        err,
    }
}

// Copyright (c) The autotriage Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    DeserializeError, DeserializedReport, SerializeError, deserialize::deserialize_report,
    serialize::serialize_report,
};
use indexmap::map::IndexMap;
use std::{io, time::Duration};

/// The root element of an xUnit report.
#[derive(Clone, Debug, Default)]
pub struct Report {
    /// The name of this report, if any.
    pub name: Option<String>,

    /// The test suites contained in this report, in document order.
    pub testsuites: Vec<Testsuite>,
}

impl Report {
    /// Creates a new, empty `Report`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the name of the report.
    pub fn set_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = Some(name.into());
        self
    }

    /// Adds a new testsuite.
    pub fn add_testsuite(&mut self, testsuite: Testsuite) -> &mut Self {
        self.testsuites.push(testsuite);
        self
    }

    /// Reads a report, returning an error if any testsuite within it is malformed.
    ///
    /// Use [`Report::deserialize_lenient`] to recover the well-formed testsuites of a
    /// partially malformed report.
    pub fn deserialize_str(xml: &str) -> Result<Self, DeserializeError> {
        let DeserializedReport { name, testsuites } = deserialize_report(xml)?;
        let testsuites = testsuites.into_iter().collect::<Result<Vec<_>, _>>()?;
        Ok(Self { name, testsuites })
    }

    /// Reads a report, returning a result per testsuite.
    ///
    /// An error is returned for the whole document only if it is not well-formed XML.
    pub fn deserialize_lenient(xml: &str) -> Result<DeserializedReport, DeserializeError> {
        deserialize_report(xml)
    }

    /// Serialize this report to the given writer.
    pub fn serialize(&self, writer: impl io::Write) -> Result<(), SerializeError> {
        serialize_report(self, writer)
    }

    /// Serialize this report to a string.
    pub fn to_string(&self) -> Result<String, SerializeError> {
        let mut buf: Vec<u8> = vec![];
        self.serialize(&mut buf)?;
        String::from_utf8(buf)
            .map_err(|err| SerializeError::from(io::Error::new(io::ErrorKind::InvalidData, err)))
    }
}

/// Represents a single testsuite.
///
/// A `Testsuite` groups together several `Testcase` instances. The counts are those recorded
/// in the document and are not recomputed from the testcases when read.
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct Testsuite {
    /// The name of this testsuite.
    pub name: Option<String>,

    /// The total number of tests in this testsuite.
    pub tests: usize,

    /// The total number of tests in this suite that failed.
    ///
    /// A "failure" is usually some sort of *expected* issue in a test.
    pub failures: usize,

    /// The total number of tests in this suite that errored.
    ///
    /// An "error" is usually some sort of *unexpected* issue in a test.
    pub errors: usize,

    /// The total number of skipped tests in this testsuite.
    pub skipped: usize,

    /// The total number of disabled tests in this testsuite.
    pub disabled: usize,

    /// The timestamp at which the testsuite began execution, verbatim from the document.
    ///
    /// Producers disagree on the format (RFC 3339, epoch nanoseconds), so this is kept as a
    /// string.
    pub timestamp: Option<String>,

    /// The overall time taken by the testsuite.
    pub time: Option<Duration>,

    /// Custom properties set during test execution.
    pub properties: Vec<Property>,

    /// Whether a `<properties>` element was present, even if empty.
    pub has_properties: bool,

    /// The testcases that form this testsuite.
    pub testcases: Vec<Testcase>,

    /// Data written to standard output while the testsuite was executed.
    pub system_out: Option<Output>,

    /// Other attributes, such as "hostname" or "package".
    pub extra: IndexMap<String, String>,
}

impl Testsuite {
    /// Creates a new `Testsuite`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Sets the start timestamp for the testsuite.
    pub fn set_timestamp(&mut self, timestamp: impl Into<String>) -> &mut Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    /// Sets the time taken for the testsuite.
    pub fn set_time(&mut self, time: Duration) -> &mut Self {
        self.time = Some(time);
        self
    }

    /// Adds a property to this testsuite.
    pub fn add_property(&mut self, property: impl Into<Property>) -> &mut Self {
        self.has_properties = true;
        self.properties.push(property.into());
        self
    }

    /// Adds several properties to this testsuite.
    pub fn add_properties(
        &mut self,
        properties: impl IntoIterator<Item = impl Into<Property>>,
    ) -> &mut Self {
        for property in properties {
            self.add_property(property);
        }
        self
    }

    /// Returns the value of the first property with the given name.
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|property| property.name == name)
            .map(|property| property.value.as_str())
    }

    /// Adds a testcase to this testsuite and updates the counts.
    ///
    /// When generating a new report, use of this method is recommended over adding to
    /// `self.testcases` directly.
    pub fn add_testcase(&mut self, testcase: Testcase) -> &mut Self {
        self.tests += 1;
        match &testcase.status {
            TestcaseStatus::Success => {}
            TestcaseStatus::NonSuccess { kind, .. } => match kind {
                NonSuccessKind::Failure => self.failures += 1,
                NonSuccessKind::Error => self.errors += 1,
            },
            TestcaseStatus::Skipped { .. } => self.skipped += 1,
        }
        self.testcases.push(testcase);
        self
    }

    /// Adds several testcases to this testsuite and updates the counts.
    pub fn add_testcases(&mut self, testcases: impl IntoIterator<Item = Testcase>) -> &mut Self {
        for testcase in testcases {
            self.add_testcase(testcase);
        }
        self
    }

    /// Sets standard output.
    pub fn set_system_out(&mut self, system_out: impl AsRef<str>) -> &mut Self {
        self.system_out = Some(Output::new(system_out.as_ref()));
        self
    }
}

/// Represents a single testcase.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct Testcase {
    /// The name of the testcase.
    pub name: String,

    /// The "classname" of the testcase.
    ///
    /// For Go tests this is the package the test belongs to.
    pub classname: Option<String>,

    /// The time it took to execute this testcase.
    pub time: Option<Duration>,

    /// The status of this test.
    pub status: TestcaseStatus,

    /// Data written to standard output while the testcase was executed.
    pub system_out: Option<Output>,

    /// Data written to standard error while the testcase was executed.
    pub system_err: Option<Output>,

    /// Other attributes.
    pub extra: IndexMap<String, String>,
}

impl Testcase {
    /// Creates a new testcase.
    pub fn new(name: impl Into<String>, status: TestcaseStatus) -> Self {
        Self {
            name: name.into(),
            classname: None,
            time: None,
            status,
            system_out: None,
            system_err: None,
            extra: IndexMap::new(),
        }
    }

    /// Sets the classname of the test.
    pub fn set_classname(&mut self, classname: impl Into<String>) -> &mut Self {
        self.classname = Some(classname.into());
        self
    }

    /// Sets the time taken for the testcase.
    pub fn set_time(&mut self, time: Duration) -> &mut Self {
        self.time = Some(time);
        self
    }

    /// Sets standard output.
    pub fn set_system_out(&mut self, system_out: impl AsRef<str>) -> &mut Self {
        self.system_out = Some(Output::new(system_out.as_ref()));
        self
    }

    /// Sets standard error.
    pub fn set_system_err(&mut self, system_err: impl AsRef<str>) -> &mut Self {
        self.system_err = Some(Output::new(system_err.as_ref()));
        self
    }

    /// Returns the failure text of this testcase, followed by its standard output.
    ///
    /// This is the log that failure analysis works from. Returns `None` for testcases that
    /// did not fail.
    pub fn failure_log(&self) -> Option<String> {
        let TestcaseStatus::NonSuccess { description, .. } = &self.status else {
            return None;
        };
        let parts: Vec<&str> = description
            .as_deref()
            .into_iter()
            .chain(self.system_out.as_ref().map(Output::as_str))
            .filter(|part| !part.is_empty())
            .collect();
        Some(parts.join("\n"))
    }
}

/// Represents the success or failure of a testcase.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TestcaseStatus {
    /// This testcase passed.
    Success,

    /// This testcase did not pass.
    NonSuccess {
        /// Whether this testcase failed in an expected way (failure) or an unexpected way (error).
        kind: NonSuccessKind,

        /// The failure message attribute.
        message: Option<String>,

        /// The "type" of failure that occurred.
        ty: Option<String>,

        /// The description of the failure.
        ///
        /// This is serialized and deserialized from the text node of the element.
        description: Option<String>,
    },

    /// This testcase was not run.
    Skipped {
        /// The skip message.
        message: Option<String>,

        /// The description of the skip, from the text node of the element.
        description: Option<String>,
    },
}

impl TestcaseStatus {
    /// Creates a new `TestcaseStatus` that represents a successful test.
    pub fn success() -> Self {
        TestcaseStatus::Success
    }

    /// Creates a new `TestcaseStatus` that represents an unsuccessful test.
    pub fn non_success(kind: NonSuccessKind) -> Self {
        TestcaseStatus::NonSuccess {
            kind,
            message: None,
            ty: None,
            description: None,
        }
    }

    /// Creates a new `TestcaseStatus` that represents a skipped test.
    pub fn skipped() -> Self {
        TestcaseStatus::Skipped {
            message: None,
            description: None,
        }
    }

    /// Sets the message. No-op if this is a success case.
    pub fn set_message(&mut self, message: impl Into<String>) -> &mut Self {
        let message_mut = match self {
            TestcaseStatus::Success => return self,
            TestcaseStatus::NonSuccess { message, .. } => message,
            TestcaseStatus::Skipped { message, .. } => message,
        };
        *message_mut = Some(message.into());
        self
    }

    /// Sets the description (text node). No-op if this is a success case.
    pub fn set_description(&mut self, description: impl Into<String>) -> &mut Self {
        let description_mut = match self {
            TestcaseStatus::Success => return self,
            TestcaseStatus::NonSuccess { description, .. } => description,
            TestcaseStatus::Skipped { description, .. } => description,
        };
        *description_mut = Some(description.into());
        self
    }

    /// Returns the message attribute, if any.
    pub fn message(&self) -> Option<&str> {
        match self {
            TestcaseStatus::Success => None,
            TestcaseStatus::NonSuccess { message, .. } | TestcaseStatus::Skipped { message, .. } => {
                message.as_deref()
            }
        }
    }

    /// Returns the text of the failure, error or skipped element, if any.
    pub fn description(&self) -> Option<&str> {
        match self {
            TestcaseStatus::Success => None,
            TestcaseStatus::NonSuccess { description, .. }
            | TestcaseStatus::Skipped { description, .. } => description.as_deref(),
        }
    }
}

/// The kind of a non-successful testcase.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum NonSuccessKind {
    /// This is an expected failure. Serialized as `failure`.
    Failure,

    /// This is an unexpected error. Serialized as `error`.
    Error,
}

/// Custom properties set during test execution, e.g. the test plan identifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Property {
    /// The name of the property.
    pub name: String,

    /// The value of the property.
    pub value: String,
}

impl Property {
    /// Creates a new `Property` instance.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl<T> From<(T, T)> for Property
where
    T: Into<String>,
{
    fn from((k, v): (T, T)) -> Self {
        Property::new(k, v)
    }
}

/// Text written to standard output during test execution.
///
/// xUnit assumes that the output is valid Unicode. Control characters that XML 1.0 cannot
/// represent are removed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Output {
    output: Box<str>,
}

impl Output {
    /// Creates a new output, removing any non-printable characters from it.
    pub fn new(output: impl AsRef<str>) -> Self {
        let output = output
            .as_ref()
            .replace(
                |c| matches!(c, '\x00'..='\x08' | '\x0b' | '\x0c' | '\x0e'..='\x1f'),
                "",
            )
            .into_boxed_str();
        Self { output }
    }

    /// Returns the output.
    pub fn as_str(&self) -> &str {
        &self.output
    }
}

impl AsRef<str> for Output {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

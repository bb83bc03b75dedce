//! OAI-PMH response framing.
//!
//! # Responsibility
//! - Define the envelope contract the emitter drives.
//! - Provide the OAI-PMH 2.0 XML writer built on `quick-xml`.
//!
//! # Invariants
//! - `error` writes a complete standalone response; it is never combined
//!   with `open`/`close` on the same envelope.
//! - Metadata fragments are written verbatim, without escaping.

use super::{HarvestError, HarvestResult};
use crate::model::record::EpochMillis;
use crate::tree::window::format_datestamp;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Write;
use time::OffsetDateTime;

const OAI_NAMESPACE: &str = "http://www.openarchives.org/OAI/2.0/";
const XSI_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema-instance";
const OAI_SCHEMA_LOCATION: &str =
    "http://www.openarchives.org/OAI/2.0/ http://www.openarchives.org/OAI/2.0/OAI-PMH.xsd";

/// OAI-PMH error codes this service can answer with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OaiErrorCode {
    BadArgument,
    CannotDisseminateFormat,
    NoRecordsMatch,
}

impl OaiErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BadArgument => "badArgument",
            Self::CannotDisseminateFormat => "cannotDisseminateFormat",
            Self::NoRecordsMatch => "noRecordsMatch",
        }
    }
}

/// Verb element wrapping the emitted records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    ListRecords,
    ListIdentifiers,
    GetRecord,
}

impl ResponseKind {
    pub fn element(self) -> &'static str {
        match self {
            Self::ListRecords => "ListRecords",
            Self::ListIdentifiers => "ListIdentifiers",
            Self::GetRecord => "GetRecord",
        }
    }

    /// ListIdentifiers carries bare headers; the other verbs wrap each
    /// header in a `record` element.
    pub fn wraps_records(self) -> bool {
        !matches!(self, Self::ListIdentifiers)
    }
}

/// Header of one emitted record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    pub identifier: String,
    pub datestamp: String,
    pub set_specs: Vec<String>,
    pub deleted: bool,
}

/// Protocol framing driven by the tree stream emitter.
pub trait ResponseEnvelope {
    fn open(&mut self, kind: ResponseKind) -> HarvestResult<()>;
    fn record(&mut self, header: &RecordHeader, metadata: Option<&str>) -> HarvestResult<()>;
    fn close(&mut self) -> HarvestResult<()>;
    fn error(&mut self, code: OaiErrorCode, message: &str) -> HarvestResult<()>;
}

/// Request echo written into every response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub verb: String,
    /// Protocol arguments in the order they should be echoed.
    pub arguments: Vec<(String, String)>,
    /// Repository base URL, written as the `request` element text.
    pub base_url: String,
}

impl RequestContext {
    pub fn new(verb: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            verb: verb.into(),
            arguments: Vec::new(),
            base_url: base_url.into(),
        }
    }

    pub fn with_argument(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.arguments.push((name.into(), value.into()));
        self
    }
}

/// OAI-PMH 2.0 XML envelope over any writer.
pub struct XmlEnvelope<W: Write> {
    writer: Writer<W>,
    request: RequestContext,
    response_date: EpochMillis,
    open_kind: Option<ResponseKind>,
}

impl<W: Write> XmlEnvelope<W> {
    pub fn new(inner: W, request: RequestContext) -> Self {
        let now = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
        Self {
            writer: Writer::new(inner),
            request,
            response_date: now as EpochMillis,
            open_kind: None,
        }
    }

    /// Pins `responseDate`.
    pub fn with_response_date(mut self, response_date: EpochMillis) -> Self {
        self.response_date = response_date;
        self
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }

    fn write_preamble(&mut self) -> HarvestResult<()> {
        self.writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

        let mut root = BytesStart::new("OAI-PMH");
        root.push_attribute(("xmlns", OAI_NAMESPACE));
        root.push_attribute(("xmlns:xsi", XSI_NAMESPACE));
        root.push_attribute(("xsi:schemaLocation", OAI_SCHEMA_LOCATION));
        self.writer.write_event(Event::Start(root))?;

        let response_date = format_datestamp(self.response_date)?;
        self.text_element("responseDate", &response_date)?;

        let mut request = BytesStart::new("request");
        request.push_attribute(("verb", self.request.verb.as_str()));
        for (name, value) in &self.request.arguments {
            request.push_attribute((name.as_str(), value.as_str()));
        }
        self.writer.write_event(Event::Start(request))?;
        self.writer
            .write_event(Event::Text(BytesText::new(&self.request.base_url)))?;
        self.writer.write_event(Event::End(BytesEnd::new("request")))?;
        Ok(())
    }

    fn write_postamble(&mut self) -> HarvestResult<()> {
        self.writer.write_event(Event::End(BytesEnd::new("OAI-PMH")))?;
        self.writer.get_mut().flush()?;
        Ok(())
    }

    fn text_element(&mut self, name: &str, text: &str) -> HarvestResult<()> {
        self.writer.write_event(Event::Start(BytesStart::new(name)))?;
        self.writer.write_event(Event::Text(BytesText::new(text)))?;
        self.writer.write_event(Event::End(BytesEnd::new(name)))?;
        Ok(())
    }

    fn write_header(&mut self, header: &RecordHeader) -> HarvestResult<()> {
        let mut start = BytesStart::new("header");
        if header.deleted {
            start.push_attribute(("status", "deleted"));
        }
        self.writer.write_event(Event::Start(start))?;
        self.text_element("identifier", &header.identifier)?;
        self.text_element("datestamp", &header.datestamp)?;
        for set_spec in &header.set_specs {
            self.text_element("setSpec", set_spec)?;
        }
        self.writer.write_event(Event::End(BytesEnd::new("header")))?;
        Ok(())
    }
}

impl<W: Write> ResponseEnvelope for XmlEnvelope<W> {
    fn open(&mut self, kind: ResponseKind) -> HarvestResult<()> {
        if self.open_kind.is_some() {
            return Err(HarvestError::EnvelopeState("envelope already open"));
        }
        self.write_preamble()?;
        self.writer
            .write_event(Event::Start(BytesStart::new(kind.element())))?;
        self.open_kind = Some(kind);
        Ok(())
    }

    fn record(&mut self, header: &RecordHeader, metadata: Option<&str>) -> HarvestResult<()> {
        let kind = self
            .open_kind
            .ok_or(HarvestError::EnvelopeState("record written before open"))?;

        if !kind.wraps_records() {
            return self.write_header(header);
        }

        self.writer.write_event(Event::Start(BytesStart::new("record")))?;
        self.write_header(header)?;
        if let Some(metadata) = metadata {
            self.writer
                .write_event(Event::Start(BytesStart::new("metadata")))?;
            self.writer
                .write_event(Event::Text(BytesText::from_escaped(metadata)))?;
            self.writer.write_event(Event::End(BytesEnd::new("metadata")))?;
        }
        self.writer.write_event(Event::End(BytesEnd::new("record")))?;
        Ok(())
    }

    fn close(&mut self) -> HarvestResult<()> {
        let kind = self
            .open_kind
            .take()
            .ok_or(HarvestError::EnvelopeState("close without open"))?;
        self.writer
            .write_event(Event::End(BytesEnd::new(kind.element())))?;
        self.write_postamble()
    }

    fn error(&mut self, code: OaiErrorCode, message: &str) -> HarvestResult<()> {
        if self.open_kind.is_some() {
            return Err(HarvestError::EnvelopeState("error after open"));
        }
        self.write_preamble()?;
        let mut start = BytesStart::new("error");
        start.push_attribute(("code", code.as_str()));
        self.writer.write_event(Event::Start(start))?;
        self.writer.write_event(Event::Text(BytesText::new(message)))?;
        self.writer.write_event(Event::End(BytesEnd::new("error")))?;
        self.write_postamble()
    }
}

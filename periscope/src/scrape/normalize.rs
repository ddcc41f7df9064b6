//! Response normalization
//!
//! Splunk answers in two shapes. Search job endpoints speak XML: a job
//! submission yields `<response><sid>…</sid></response>` and a finished job's
//! results are a `<results>` document of `<result>` rows, each a run of
//! `<field k="name"><value><text>…</text></value></field>` elements. REST
//! endpoints speak JSON: an object whose `entry` array holds named entries
//! with endpoint specific `content`.
//!
//! Normalization never discards the status code. A caller may act on status
//! alone when the body is empty or does not decode.

use http::StatusCode;
use quick_xml::{Reader, events::Event};
use serde::Deserialize;

use super::errors::Error;
use crate::client::Response;

/// One name/value pair from a row of tabular search results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRecord {
    /// The field name, the `k` attribute
    pub name: String,
    /// The field's textual value
    pub value: String,
}

impl FieldRecord {
    /// Construct a new [`FieldRecord`].
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A decoded search job document.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SearchPayload {
    /// The job identifier, present on job creation responses
    pub job_id: Option<String>,
    /// Every field of every result row, in document order
    pub fields: Vec<FieldRecord>,
    /// Server messages, typically explaining a rejection
    pub messages: Vec<String>,
}

/// One element of a JSON entry list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Entry {
    /// The entry's identity, possibly empty
    #[serde(default)]
    pub name: String,
    /// Endpoint specific content
    #[serde(default)]
    pub content: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct EntryList {
    #[serde(default)]
    entry: Vec<Entry>,
}

/// The outcome of normalizing one response.
#[derive(Debug)]
pub struct Normalized<T> {
    /// The response status, always recorded
    pub status: StatusCode,
    /// `Ok(None)` for an empty body, otherwise the decode result
    pub payload: Result<Option<T>, Error>,
}

/// Normalize a search job response.
#[must_use]
pub fn search(response: &Response) -> Normalized<SearchPayload> {
    normalize(response, |body| decode_search(body).map_err(Error::from))
}

/// Normalize a REST endpoint response.
#[must_use]
pub fn entries(response: &Response) -> Normalized<Vec<Entry>> {
    normalize(response, |body| decode_entries(body).map_err(Error::from))
}

fn normalize<T, F>(response: &Response, decode: F) -> Normalized<T>
where
    F: FnOnce(&[u8]) -> Result<T, Error>,
{
    let payload = if response.body.is_empty() {
        Ok(None)
    } else {
        decode(response.body.as_ref()).map(Some)
    };
    Normalized {
        status: response.status,
        payload,
    }
}

/// Decode a JSON entry list.
///
/// # Errors
///
/// Function will error if `body` is not a JSON object with an optional
/// `entry` array.
pub fn decode_entries(body: &[u8]) -> Result<Vec<Entry>, serde_json::Error> {
    let list: EntryList = serde_json::from_slice(body)?;
    Ok(list.entry)
}

#[derive(Debug, Default)]
struct PendingField {
    name: String,
    value: String,
    complete: bool,
}

/// Decode an XML search job document.
///
/// # Errors
///
/// Function will error if `body` is not well-formed XML.
pub fn decode_search(body: &[u8]) -> Result<SearchPayload, quick_xml::Error> {
    let mut reader = Reader::from_reader(body);
    reader.config_mut().trim_text(true);

    let mut payload = SearchPayload::default();
    let mut path: Vec<Vec<u8>> = Vec::new();
    let mut field: Option<PendingField> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                let name = e.local_name().as_ref().to_vec();
                if name == b"field" && parent_is(&path, b"result") {
                    let key = match e.try_get_attribute("k")? {
                        Some(attr) => attr.unescape_value()?.into_owned(),
                        None => String::new(),
                    };
                    field = Some(PendingField {
                        name: key,
                        ..PendingField::default()
                    });
                }
                path.push(name);
            }
            Event::End(e) => {
                let name = e.local_name();
                if name.as_ref() == b"value" {
                    if let Some(f) = field.as_mut() {
                        // Multi-valued fields keep their first value.
                        f.complete = true;
                    }
                } else if name.as_ref() == b"field" {
                    if let Some(f) = field.take() {
                        payload.fields.push(FieldRecord::new(f.name, f.value));
                    }
                }
                path.pop();
            }
            Event::Text(e) => {
                let text = e.unescape()?;
                absorb_text(&path, &text, &mut payload, field.as_mut());
            }
            Event::CData(e) => {
                let raw = e.into_inner();
                let text = String::from_utf8_lossy(&raw);
                absorb_text(&path, &text, &mut payload, field.as_mut());
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(payload)
}

fn parent_is(path: &[Vec<u8>], name: &[u8]) -> bool {
    path.last().is_some_and(|p| p.as_slice() == name)
}

fn ends_with(path: &[Vec<u8>], tail: &[&[u8]]) -> bool {
    path.len() >= tail.len()
        && path[path.len() - tail.len()..]
            .iter()
            .zip(tail)
            .all(|(a, b)| a.as_slice() == *b)
}

fn absorb_text(
    path: &[Vec<u8>],
    text: &str,
    payload: &mut SearchPayload,
    field: Option<&mut PendingField>,
) {
    if let Some(f) = field {
        if !f.complete && (ends_with(path, &[b"value", b"text"]) || parent_is(path, b"v")) {
            f.value.push_str(text);
        }
    } else if ends_with(path, &[b"response", b"sid"]) {
        payload.job_id = Some(text.to_string());
    } else if ends_with(path, &[b"messages", b"msg"]) {
        payload.messages.push(text.to_string());
    }
}

// SPDX-FileCopyrightText: 2025 The hoarder Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! rtorrent XMLRPC adapter. The wire format is small and fixed (one
//! multicall for listing, one load for uploads), so requests are built and
//! scanned by hand rather than through an XML library.

use async_trait::async_trait;
use data_encoding::BASE64;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RtorrentError {
    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("server returned HTTP status {0}")]
    Status(u16),
    #[error("xmlrpc fault: {0}")]
    Fault(String),
    #[error("malformed xmlrpc response: {0}")]
    Malformed(&'static str),
}

/// One torrent as reported by rtorrent's main view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentInfo {
    pub hash: String,
    pub name: String,
    /// Remote payload path (`d.base_path`).
    pub path: String,
    pub size: u64,
    pub completed: bool,
}

#[async_trait]
pub trait RtorrentClient: Send + Sync {
    /// Current torrent list from the main view.
    async fn torrents(&self) -> Result<Vec<TorrentInfo>, RtorrentError>;

    /// Uploads a raw metainfo blob and starts it.
    async fn add(&self, metainfo: &[u8]) -> Result<(), RtorrentError>;
}

pub struct XmlRpc {
    http: reqwest::Client,
    addr: String,
    username: String,
    password: String,
}

impl XmlRpc {
    pub fn new(
        addr: &str,
        insecure_cert: bool,
        username: &str,
        password: &str,
    ) -> Result<Self, RtorrentError> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(insecure_cert)
            .build()?;

        Ok(Self {
            http,
            addr: addr.to_string(),
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    async fn call(&self, body: String) -> Result<String, RtorrentError> {
        let mut request = self
            .http
            .post(&self.addr)
            .header("Content-Type", "text/xml")
            .body(body);
        if !self.username.is_empty() || !self.password.is_empty() {
            request = request.basic_auth(&self.username, Some(&self.password));
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(RtorrentError::Status(status.as_u16()));
        }
        if let Some(fault) = extract_fault(&text) {
            return Err(RtorrentError::Fault(fault));
        }
        Ok(text)
    }
}

#[async_trait]
impl RtorrentClient for XmlRpc {
    async fn torrents(&self) -> Result<Vec<TorrentInfo>, RtorrentError> {
        let body = method_call(
            "d.multicall2",
            &[
                Param::Str(""),
                Param::Str("main"),
                Param::Str("d.hash="),
                Param::Str("d.name="),
                Param::Str("d.base_path="),
                Param::Str("d.size_bytes="),
                Param::Str("d.complete="),
            ],
        );
        let xml = self.call(body).await?;
        parse_torrent_list(&xml)
    }

    async fn add(&self, metainfo: &[u8]) -> Result<(), RtorrentError> {
        let encoded = BASE64.encode(metainfo);
        let body = method_call("load.raw_start", &[Param::Str(""), Param::Base64(&encoded)]);
        self.call(body).await.map(|_| ())
    }
}

enum Param<'a> {
    Str(&'a str),
    Base64(&'a str),
}

fn method_call(method: &str, params: &[Param<'_>]) -> String {
    let mut body = String::from("<?xml version=\"1.0\"?>\n<methodCall>\n");
    body.push_str("<methodName>");
    body.push_str(method);
    body.push_str("</methodName>\n<params>\n");
    for param in params {
        match param {
            Param::Str(s) => {
                body.push_str("<param><value><string>");
                body.push_str(&escape_xml(s));
                body.push_str("</string></value></param>\n");
            }
            Param::Base64(b) => {
                body.push_str("<param><value><base64>");
                body.push_str(b);
                body.push_str("</base64></value></param>\n");
            }
        }
    }
    body.push_str("</params>\n</methodCall>\n");
    body
}

fn escape_xml(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn unescape_xml(raw: &str) -> String {
    raw.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Pulls the fault string out of an XMLRPC `<fault>` response, if any.
fn extract_fault(xml: &str) -> Option<String> {
    let fault = &xml[xml.find("<fault>")? + "<fault>".len()..];
    let start = fault.find("<string>")? + "<string>".len();
    let end = fault[start..].find("</string>")? + start;
    Some(unescape_xml(&fault[start..end]))
}

/// Collects the inner text of each scalar `<value><T>…</T></value>` in
/// document order.
fn scalar_values(chunk: &str) -> Result<Vec<String>, RtorrentError> {
    let mut values = Vec::new();
    let mut rest = chunk;
    while let Some(at) = rest.find("<value>") {
        rest = rest[at + "<value>".len()..].trim_start();
        if !rest.starts_with('<') {
            return Err(RtorrentError::Malformed("untyped value"));
        }
        let tag_end = rest
            .find('>')
            .ok_or(RtorrentError::Malformed("unterminated value tag"))?;
        let tag = &rest[1..tag_end];
        let close = format!("</{}>", tag);
        let body_start = tag_end + 1;
        let body_end = rest[body_start..]
            .find(&close)
            .ok_or(RtorrentError::Malformed("unterminated value body"))?
            + body_start;
        values.push(unescape_xml(&rest[body_start..body_end]));
        rest = &rest[body_end + close.len()..];
    }
    Ok(values)
}

/// Decodes a `d.multicall2` response: an outer array holding one inner
/// array per torrent, fields in request order.
fn parse_torrent_list(xml: &str) -> Result<Vec<TorrentInfo>, RtorrentError> {
    let outer = xml
        .find("<data>")
        .ok_or(RtorrentError::Malformed("missing result array"))?;
    let mut rest = &xml[outer + "<data>".len()..];

    let mut torrents = Vec::new();
    while let Some(start) = rest.find("<data>") {
        let entry = &rest[start + "<data>".len()..];
        let end = entry
            .find("</data>")
            .ok_or(RtorrentError::Malformed("unterminated torrent entry"))?;
        let fields = scalar_values(&entry[..end])?;
        if fields.len() < 5 {
            return Err(RtorrentError::Malformed("short torrent entry"));
        }

        torrents.push(TorrentInfo {
            hash: fields[0].clone(),
            name: fields[1].clone(),
            path: fields[2].clone(),
            size: fields[3]
                .parse()
                .map_err(|_| RtorrentError::Malformed("unparsable torrent size"))?,
            completed: fields[4] == "1",
        });

        rest = &entry[end + "</data>".len()..];
    }

    Ok(torrents)
}

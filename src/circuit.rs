//! Circuit introspection over the Tor control port.
//!
//! The control port is a line protocol separate from the SOCKS data plane.
//! Replies are `NNN-text` (more lines follow), `NNN+text` (a data block
//! terminated by a lone `.` follows) or `NNN text` (last line).

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::{Result, SearchError};

/// Longest reply line accepted from the control port.
const MAX_LINE_BYTES: usize = 64 * 1024;

/// Control port connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Password for `HASHEDPASSWORD` authentication.
    #[serde(default)]
    pub password: Option<String>,
    /// Cookie file, overriding the path announced by the daemon.
    #[serde(default)]
    pub cookie_path: Option<PathBuf>,
    /// Session timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    9051
}

fn default_timeout() -> u64 {
    10
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            password: None,
            cookie_path: None,
            timeout: default_timeout(),
        }
    }
}

/// One relay of a circuit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayNode {
    /// Hex identity fingerprint, without the leading `$`.
    pub fingerprint: String,
    pub nickname: Option<String>,
    /// Two-letter country code, uppercase.
    pub country: Option<String>,
    pub address: Option<String>,
    pub flags: BTreeSet<String>,
}

impl RelayNode {
    fn new(fingerprint: impl Into<String>, nickname: Option<String>) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            nickname,
            country: None,
            address: None,
            flags: BTreeSet::new(),
        }
    }
}

/// A built circuit, entry relay first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitPath {
    pub id: String,
    pub purpose: Option<String>,
    pub relays: Vec<RelayNode>,
}

/// What `PROTOCOLINFO` announced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtocolInfo {
    pub auth_methods: Vec<String>,
    pub cookie_file: Option<PathBuf>,
    pub tor_version: Option<String>,
}

impl ProtocolInfo {
    pub fn supports(&self, method: &str) -> bool {
        self.auth_methods.iter().any(|m| m.eq_ignore_ascii_case(method))
    }
}

/// Router status fields of a relay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NsEntry {
    pub nickname: Option<String>,
    pub address: Option<String>,
    pub flags: BTreeSet<String>,
}

/// Parses the body of a `PROTOCOLINFO` reply.
pub fn parse_protocolinfo(reply: &str) -> ProtocolInfo {
    let mut info = ProtocolInfo::default();

    for line in reply.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("AUTH ") {
            for (key, value) in split_keywords(rest) {
                match key {
                    "METHODS" => {
                        info.auth_methods = value.split(',').map(str::to_string).collect();
                    }
                    "COOKIEFILE" => info.cookie_file = Some(PathBuf::from(value)),
                    _ => {}
                }
            }
        } else if let Some(rest) = line.strip_prefix("VERSION ") {
            info.tor_version = split_keywords(rest)
                .into_iter()
                .find(|(key, _)| *key == "Tor")
                .map(|(_, value)| value);
        }
    }

    info
}

/// Parses `circuit-status` lines, keeping only built circuits.
///
/// Relays carry fingerprint and nickname; the other fields stay empty.
pub fn parse_circuit_status(status: &str) -> Vec<CircuitPath> {
    status
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let id = parts.next()?;
            if parts.next()? != "BUILT" {
                return None;
            }

            let mut relays = Vec::new();
            let mut purpose = None;
            for part in parts {
                if let Some(value) = part.strip_prefix("PURPOSE=") {
                    purpose = Some(value.to_string());
                } else if part.starts_with('$') {
                    relays = part.split(',').filter_map(parse_long_name).collect();
                }
            }

            Some(CircuitPath {
                id: id.to_string(),
                purpose,
                relays,
            })
        })
        .collect()
}

/// Parses `$FINGERPRINT~nickname`, `$FINGERPRINT=nickname` or `$FINGERPRINT`.
fn parse_long_name(name: &str) -> Option<RelayNode> {
    let name = name.strip_prefix('$')?;
    let (fingerprint, nickname) = match name.find(['~', '=']) {
        Some(pos) => (&name[..pos], Some(name[pos + 1..].to_string())),
        None => (name, None),
    };
    if fingerprint.is_empty() {
        return None;
    }
    Some(RelayNode::new(fingerprint, nickname.filter(|n| !n.is_empty())))
}

/// Parses a router status entry (`GETINFO ns/id/...`).
pub fn parse_ns_entry(entry: &str) -> Option<NsEntry> {
    let mut parsed = NsEntry::default();
    let mut seen_router = false;

    for line in entry.lines() {
        let mut parts = line.split_whitespace();
        match parts.next() {
            // r nickname identity digest date time address orport dirport
            Some("r") => {
                let fields: Vec<_> = parts.collect();
                parsed.nickname = fields.first().map(|s| s.to_string());
                parsed.address = fields.get(5).map(|s| s.to_string());
                seen_router = true;
            }
            Some("s") => parsed.flags = parts.map(str::to_string).collect(),
            _ => {}
        }
    }

    seen_router.then_some(parsed)
}

/// Parses an `ip-to-country` value. Unknown countries (`??`) yield `None`.
pub fn parse_ip_to_country(value: &str) -> Option<String> {
    let code = value.trim();
    if code.len() != 2 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    Some(code.to_ascii_uppercase())
}

/// Splits `KEY=value KEY="quoted value"` pairs.
fn split_keywords(text: &str) -> Vec<(&str, String)> {
    let mut pairs = Vec::new();
    let mut rest = text.trim_start();

    while let Some(eq) = rest.find('=') {
        let key = rest[..eq].trim();
        let after = &rest[eq + 1..];

        let (value, remaining) = if let Some(quoted) = after.strip_prefix('"') {
            let (value, consumed) = read_quoted(quoted);
            (value, &quoted[consumed..])
        } else {
            let end = after.find(' ').unwrap_or(after.len());
            (after[..end].to_string(), &after[end..])
        };

        pairs.push((key, value));
        rest = remaining.trim_start();
    }

    pairs
}

/// Reads a quoted string body, returning the unescaped value and the bytes
/// consumed including the closing quote.
fn read_quoted(text: &str) -> (String, usize) {
    let mut value = String::new();
    let mut chars = text.char_indices();

    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                if let Some((_, escaped)) = chars.next() {
                    value.push(escaped);
                }
            }
            '"' => return (value, i + 1),
            other => value.push(other),
        }
    }

    (value, text.len())
}

fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{}\"", escaped)
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}

/// One line of a reply; `data` holds the block following a `+` line.
#[derive(Debug, Default)]
struct ReplyLine {
    text: String,
    data: Vec<String>,
}

#[derive(Debug)]
struct Reply {
    code: u16,
    lines: Vec<ReplyLine>,
}

impl Reply {
    fn is_ok(&self) -> bool {
        self.code == 250
    }

    /// Every line and data line, newline-separated.
    fn text(&self) -> String {
        let mut out = Vec::new();
        for line in &self.lines {
            out.push(line.text.as_str());
            out.extend(line.data.iter().map(String::as_str));
        }
        out.join("\n")
    }

    /// Value of `key=` in a `GETINFO` reply.
    fn value(&self, key: &str) -> Option<String> {
        self.lines.iter().find_map(|line| {
            let value = line.text.strip_prefix(key)?.strip_prefix('=')?;
            if line.data.is_empty() {
                Some(value.to_string())
            } else {
                Some(line.data.join("\n"))
            }
        })
    }

    fn into_error(self, context: &str) -> SearchError {
        SearchError::ControlChannelUnavailable(format!(
            "{} failed: {} {}",
            context,
            self.code,
            self.text()
        ))
    }
}

struct ControlConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl ControlConnection {
    async fn connect(host: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((host, port)).await.map_err(|e| {
            SearchError::ControlChannelUnavailable(format!(
                "cannot connect to {}:{}: {}",
                host, port, e
            ))
        })?;
        let (read, write) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read),
            writer: write,
        })
    }

    async fn command(&mut self, command: &str) -> Result<Reply> {
        self.writer
            .write_all(format!("{}\r\n", command).as_bytes())
            .await
            .map_err(|e| SearchError::ControlChannelUnavailable(format!("write failed: {}", e)))?;
        self.read_reply().await
    }

    async fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        let n = (&mut self.reader)
            .take(MAX_LINE_BYTES as u64 + 1)
            .read_line(&mut line)
            .await
            .map_err(|e| SearchError::ControlChannelUnavailable(format!("read failed: {}", e)))?;

        if n == 0 {
            return Err(SearchError::ControlChannelUnavailable(
                "control connection closed".to_string(),
            ));
        }
        if line.len() > MAX_LINE_BYTES {
            return Err(SearchError::Protocol("control reply line too long".to_string()));
        }

        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    async fn read_reply(&mut self) -> Result<Reply> {
        let mut lines = Vec::new();

        loop {
            let line = self.read_line().await?;
            if line.len() < 4 || !line.is_char_boundary(3) || !line.is_char_boundary(4) {
                return Err(SearchError::Protocol(format!("malformed control reply: {}", line)));
            }
            let code: u16 = line[..3]
                .parse()
                .map_err(|_| SearchError::Protocol(format!("bad reply code: {}", line)))?;
            let mut reply_line = ReplyLine {
                text: line[4..].to_string(),
                data: Vec::new(),
            };

            match &line[3..4] {
                "-" => lines.push(reply_line),
                "+" => {
                    loop {
                        let data = self.read_line().await?;
                        if data == "." {
                            break;
                        }
                        let data = data.strip_prefix('.').map(str::to_string).unwrap_or(data);
                        reply_line.data.push(data);
                    }
                    lines.push(reply_line);
                }
                " " => {
                    lines.push(reply_line);
                    return Ok(Reply { code, lines });
                }
                _ => {
                    return Err(SearchError::Protocol(format!(
                        "malformed control reply: {}",
                        line
                    )))
                }
            }
        }
    }

    async fn getinfo(&mut self, key: &str) -> Result<Option<String>> {
        let reply = self.command(&format!("GETINFO {}", key)).await?;
        if !reply.is_ok() {
            debug!("GETINFO {} returned {}", key, reply.code);
            return Ok(None);
        }
        Ok(reply.value(key))
    }
}

/// Lists the circuits of a running Tor daemon.
pub struct CircuitInspector {
    config: ControlConfig,
}

impl CircuitInspector {
    pub fn new(config: ControlConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ControlConfig {
        &self.config
    }

    /// Returns the built circuits, or an empty list if the control channel
    /// is unavailable. Each call opens a fresh session.
    pub async fn list_circuits(&self) -> Vec<CircuitPath> {
        match self.try_list_circuits().await {
            Ok(circuits) => circuits,
            Err(e) => {
                warn!("Circuit listing unavailable: {}", e);
                Vec::new()
            }
        }
    }

    /// Like [`CircuitInspector::list_circuits`], but reports why the
    /// control channel could not be used.
    pub async fn try_list_circuits(&self) -> Result<Vec<CircuitPath>> {
        let limit = Duration::from_secs(self.config.timeout);
        let outcome = match timeout(limit, self.session()).await {
            Ok(result) => result,
            Err(_) => Err(SearchError::ControlChannelUnavailable(format!(
                "control session timed out after {:?}",
                limit
            ))),
        };

        outcome.map_err(|e| match e {
            SearchError::ControlChannelUnavailable(_) => e,
            other => SearchError::ControlChannelUnavailable(other.to_string()),
        })
    }

    async fn session(&self) -> Result<Vec<CircuitPath>> {
        let mut conn = ControlConnection::connect(&self.config.host, self.config.port).await?;

        let reply = conn.command("PROTOCOLINFO 1").await?;
        if !reply.is_ok() {
            return Err(reply.into_error("PROTOCOLINFO"));
        }
        let info = parse_protocolinfo(&reply.text());
        debug!(
            "Control port speaks Tor {:?}, auth methods {:?}",
            info.tor_version, info.auth_methods
        );

        let auth = self.auth_command(&info).await?;
        let reply = conn.command(&auth).await?;
        if !reply.is_ok() {
            return Err(reply.into_error("AUTHENTICATE"));
        }

        let status = conn.getinfo("circuit-status").await?.unwrap_or_default();
        let mut circuits = parse_circuit_status(&status);

        let mut details: HashMap<String, (Option<NsEntry>, Option<String>)> = HashMap::new();
        for relay in circuits.iter_mut().flat_map(|c| c.relays.iter_mut()) {
            if !details.contains_key(&relay.fingerprint) {
                let looked_up = Self::relay_details(&mut conn, &relay.fingerprint).await?;
                details.insert(relay.fingerprint.clone(), looked_up);
            }
            if let Some((entry, country)) = details.get(&relay.fingerprint) {
                if let Some(entry) = entry {
                    if relay.nickname.is_none() {
                        relay.nickname = entry.nickname.clone();
                    }
                    relay.address = entry.address.clone();
                    relay.flags = entry.flags.clone();
                }
                relay.country = country.clone();
            }
        }

        let _ = conn.command("QUIT").await;

        debug!("Listed {} built circuits", circuits.len());
        Ok(circuits)
    }

    async fn relay_details(
        conn: &mut ControlConnection,
        fingerprint: &str,
    ) -> Result<(Option<NsEntry>, Option<String>)> {
        let entry = conn
            .getinfo(&format!("ns/id/{}", fingerprint))
            .await?
            .and_then(|text| parse_ns_entry(&text));

        let country = match entry.as_ref().and_then(|e| e.address.as_deref()) {
            Some(address) => conn
                .getinfo(&format!("ip-to-country/{}", address))
                .await?
                .and_then(|value| parse_ip_to_country(&value)),
            None => None,
        };

        Ok((entry, country))
    }

    async fn auth_command(&self, info: &ProtocolInfo) -> Result<String> {
        if let Some(password) = &self.config.password {
            return Ok(format!("AUTHENTICATE {}", quote(password)));
        }

        if info.supports("COOKIE") {
            if let Some(path) = self.config.cookie_path.as_ref().or(info.cookie_file.as_ref()) {
                let cookie = tokio::fs::read(path).await.map_err(|e| {
                    SearchError::ControlChannelUnavailable(format!(
                        "cannot read cookie {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                return Ok(format!("AUTHENTICATE {}", to_hex(&cookie)));
            }
        }

        if info.supports("NULL") || info.auth_methods.is_empty() {
            return Ok("AUTHENTICATE".to_string());
        }

        Err(SearchError::ControlChannelUnavailable(format!(
            "no usable authentication method among {:?}",
            info.auth_methods
        )))
    }
}

// src/adapters/probe.rs
use async_trait::async_trait;
use log::{debug, info, warn};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use std::collections::{HashMap, HashSet};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{Adapter, AdapterError};
use crate::models::game::{AdapterKind, AdapterParams, GameDescriptor, ProbeInput};
use crate::models::server::{Player, ServerInfo, LATENCY_UNKNOWN};
use crate::utils::{parse_count, parse_flag, strip_color_codes, strip_scheme};

const STATUS_UP: &str = "UP";

const PASSWORD_RULES: [&str; 5] = ["g_needpass", "needpass", "si_usepass", "pswrd", "password"];
const SECURE_RULES: [&str; 3] = ["punkbuster", "sv_punkbuster", "secure"];

/// A decoded XML element. Repeated children are always kept as a list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlElement {
    pub name: String,
    pub attributes: HashMap<String, String>,
    pub text: String,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    fn from_tag(tag: &BytesStart<'_>) -> Self {
        let attributes = tag
            .attributes()
            .with_checks(false)
            .flatten()
            .map(|attr| {
                let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                let value = match attr.unescape_value() {
                    Ok(value) => value.into_owned(),
                    Err(_) => String::from_utf8_lossy(&attr.value).into_owned(),
                };
                (key, value)
            })
            .collect();

        Self {
            name: String::from_utf8_lossy(tag.name().as_ref()).into_owned(),
            attributes,
            text: String::new(),
            children: Vec::new(),
        }
    }

    /// Decodes a document and returns its root element.
    pub fn parse(xml: &str) -> Result<XmlElement, AdapterError> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);

        let mut stack = vec![XmlElement::default()];
        loop {
            match reader.read_event() {
                Ok(Event::Start(tag)) => stack.push(XmlElement::from_tag(&tag)),
                Ok(Event::Empty(tag)) => {
                    let element = XmlElement::from_tag(&tag);
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(element);
                    }
                }
                Ok(Event::End(_)) => {
                    if stack.len() < 2 {
                        return Err(AdapterError::parse("probe report", "unbalanced end tag"));
                    }
                    if let Some(element) = stack.pop() {
                        if let Some(parent) = stack.last_mut() {
                            parent.children.push(element);
                        }
                    }
                }
                Ok(Event::Text(text)) => {
                    let text = text
                        .unescape()
                        .map_err(|e| AdapterError::parse("probe report", e))?;
                    if let Some(current) = stack.last_mut() {
                        current.text.push_str(&text);
                    }
                }
                Ok(Event::CData(data)) => {
                    if let Some(current) = stack.last_mut() {
                        current.text.push_str(&String::from_utf8_lossy(&data));
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => return Err(AdapterError::parse("probe report", e)),
            }
        }

        if stack.len() != 1 {
            return Err(AdapterError::parse("probe report", "unexpected end of document"));
        }
        stack
            .pop()
            .and_then(|document| document.children.into_iter().next())
            .ok_or_else(|| AdapterError::parse("probe report", "empty document"))
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |c| c.name == name)
    }

    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text.as_str())
    }
}

/// Only servers whose game name / game type match are kept, when set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeFilter {
    pub game_name: Option<String>,
    pub game_type: Option<String>,
}

impl ProbeFilter {
    pub fn from_params(params: &AdapterParams) -> Self {
        Self {
            game_name: params.server_game_name.clone(),
            game_type: params.server_game_type.clone(),
        }
    }

    pub fn matches(&self, server: &ServerInfo) -> bool {
        let matches = |expected: &Option<String>, actual: &Option<String>| match expected {
            Some(expected) => actual.as_deref() == Some(expected.as_str()),
            None => true,
        };
        matches(&self.game_name, &server.game_name) && matches(&self.game_type, &server.game_type)
    }
}

/// Row types that distinguish master replies from game servers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowTypes {
    pub master: String,
    pub server: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKind {
    Master,
    Server,
    Other,
}

impl RowTypes {
    /// The tool reports types in upper case whatever case they were requested in.
    pub fn classify(&self, row_type: &str) -> RowKind {
        if row_type.eq_ignore_ascii_case(&self.master) {
            RowKind::Master
        } else if row_type.eq_ignore_ascii_case(&self.server) {
            RowKind::Server
        } else {
            RowKind::Other
        }
    }
}

fn parse_player(entry: &XmlElement) -> Player {
    Player {
        name: strip_color_codes(entry.child_text("name").unwrap_or("")),
        score: entry.child_text("score").and_then(|s| s.trim().parse().ok()),
        ping: entry
            .child_text("ping")
            .and_then(parse_count)
            .unwrap_or(LATENCY_UNKNOWN),
    }
}

fn apply_rule(server: &mut ServerInfo, name: &str, value: &str) {
    if name == "gamename" {
        server.game_name = Some(value.to_string());
    } else if name == "game" {
        server.game_mod = Some(value.to_string());
    } else if PASSWORD_RULES.contains(&name) {
        server.password = parse_flag(value).unwrap_or(false);
    } else if SECURE_RULES.contains(&name) {
        server.secure = parse_flag(value).unwrap_or(false);
    }
    server.rules.insert(name.to_string(), value.to_string());
}

/// Builds a record from a game server row. Rows that did not answer keep
/// their host with zero counts and unknown ping.
pub fn parse_server_row(row: &XmlElement) -> Option<ServerInfo> {
    let host = row
        .child_text("hostname")
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .or_else(|| row.attr("address"))?;

    let mut server = ServerInfo::new(host);
    if row.attr("status") != Some(STATUS_UP) {
        return Some(server);
    }

    server.name = strip_color_codes(row.child_text("name").unwrap_or(""));
    server.game_type = row.child_text("gametype").map(strip_color_codes);
    server.terrain = row.child_text("map").unwrap_or("").to_string();
    server.player_count = row.child_text("numplayers").and_then(parse_count).unwrap_or(0);
    server.player_limit = row.child_text("maxplayers").and_then(parse_count).unwrap_or(0);
    server.ping = row
        .child_text("ping")
        .and_then(parse_count)
        .unwrap_or(LATENCY_UNKNOWN);

    if let Some(rules) = row.child("rules") {
        for rule in rules.children_named("rule") {
            if let Some(name) = rule.attr("name") {
                apply_rule(&mut server, name, &rule.text);
            }
        }
    }

    if let Some(players) = row.child("players") {
        server.players = players.children_named("player").map(parse_player).collect();
    }

    Some(server)
}

fn log_master_row(game: &str, row: &XmlElement) {
    let address = row.attr("address").unwrap_or("?");
    let status = row.attr("status").unwrap_or("?");
    if status == STATUS_UP {
        info!(
            "[{}] Queried master {}: status {}, {} servers",
            game,
            address,
            status,
            row.attr("servers").unwrap_or("0")
        );
    } else {
        warn!("[{}] Master query failed: {} status {}", game, address, status);
    }
}

/// Turns the query tool's XML report into server records for `game`.
pub fn parse_report(
    xml: &str,
    game: &str,
    types: &RowTypes,
    filter: &ProbeFilter,
) -> Result<Vec<ServerInfo>, AdapterError> {
    let root = XmlElement::parse(xml)?;
    if root.name != "qstat" {
        return Err(AdapterError::parse(
            "probe report",
            format!("unexpected root element <{}>", root.name),
        ));
    }

    let mut servers = Vec::new();
    let mut masters_up = 0;
    let mut rows = 0;
    for row in root.children_named("server") {
        rows += 1;
        let row_type = row.attr("type").unwrap_or("");
        match types.classify(row_type) {
            RowKind::Master => {
                if row.attr("status") == Some(STATUS_UP) {
                    masters_up += 1;
                }
                log_master_row(game, row);
            }
            RowKind::Server => match parse_server_row(row) {
                Some(mut server) => {
                    server.game_id = game.to_string();
                    if filter.matches(&server) {
                        servers.push(server);
                    }
                }
                None => debug!("[{}] Skipping server row without an address", game),
            },
            RowKind::Other => debug!("[{}] Ignoring row of type {:?}", game, row_type),
        }
    }

    if rows > 0 && servers.is_empty() && masters_up == 0 {
        warn!("[{}] No valid masters specified. Please check your master server settings.", game);
    }

    Ok(servers)
}

/// Deduplicated master hosts with any `scheme://` prefix removed.
pub fn master_hosts(masters: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    masters
        .iter()
        .map(|m| strip_scheme(m.trim()).to_string())
        .filter(|h| !h.is_empty() && seen.insert(h.clone()))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub args: Vec<String>,
    pub stdin: Option<String>,
}

fn require<'a>(
    game: &GameDescriptor,
    value: &'a Option<String>,
    param: &'static str,
) -> Result<&'a str, AdapterError> {
    value.as_deref().ok_or_else(|| AdapterError::MissingParameter {
        game: game.id.clone(),
        param,
    })
}

/// Arguments and stdin for one query-tool run covering every host.
pub fn build_invocation(game: &GameDescriptor, hosts: &[String]) -> Result<Invocation, AdapterError> {
    let params = &game.params;
    let mut args: Vec<String> = ["-xml", "-utf8"].iter().map(|s| s.to_string()).collect();

    match params.probe_input {
        ProbeInput::Stdin => {
            let mut descriptor = require(game, &params.master_type, "master_type")?.to_string();
            if let Some(game_type) = &params.server_game_type {
                descriptor = format!("{},game={}", descriptor, game_type);
            }
            args.extend(
                ["-maxsim", "9999", "-sendinterval", "1", "-R", "-P", "-f", "-"]
                    .iter()
                    .map(|s| s.to_string()),
            );
            let stdin = hosts
                .iter()
                .map(|host| format!("{} {}", descriptor, host))
                .collect::<Vec<_>>()
                .join("\n");
            Ok(Invocation {
                args,
                stdin: Some(stdin),
            })
        }
        ProbeInput::Arguments => {
            let key = require(game, &params.master_key, "master_key")?;
            args.extend(["-R", "-P"].iter().map(|s| s.to_string()));
            for host in hosts {
                args.push(format!("-{}", key));
                args.push(host.clone());
            }
            Ok(Invocation { args, stdin: None })
        }
    }
}

/// Client for masters reached through an external multi-protocol query tool.
pub struct ProbeAdapter {
    program: String,
    base_args: Vec<String>,
    timeout: Duration,
}

impl ProbeAdapter {
    /// `command` may carry leading arguments, e.g. `"flatpak-spawn --host qstat"`.
    pub fn new(command: impl AsRef<str>, timeout: Duration) -> Self {
        let mut parts = command.as_ref().split_whitespace().map(str::to_string);
        let program = parts.next().unwrap_or_else(|| "qstat".to_string());
        Self {
            program,
            base_args: parts.collect(),
            timeout,
        }
    }

    async fn run(&self, invocation: Invocation) -> Result<String, AdapterError> {
        let mut child = Command::new(&self.program)
            .args(&self.base_args)
            .args(&invocation.args)
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| AdapterError::ToolLaunch {
                command: self.program.clone(),
                source,
            })?;

        if let (Some(mut pipe), Some(input)) = (child.stdin.take(), invocation.stdin) {
            tokio::spawn(async move {
                if let Err(e) = pipe.write_all(input.as_bytes()).await {
                    debug!("Failed to feed query tool: {}", e);
                }
            });
        }

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|source| AdapterError::ToolLaunch {
                command: self.program.clone(),
                source,
            })?,
            Err(_) => {
                return Err(AdapterError::ToolTimeout {
                    command: self.program.clone(),
                    timeout: self.timeout,
                })
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AdapterError::ToolExit {
                command: self.program.clone(),
                status: format!("{} {}", output.status, stderr.trim()).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl Adapter for ProbeAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Probe
    }

    async fn stat_master(
        &self,
        game: &GameDescriptor,
        masters: &[String],
    ) -> Result<Vec<ServerInfo>, AdapterError> {
        let types = RowTypes {
            master: require(game, &game.params.master_type, "master_type")?.to_string(),
            server: require(game, &game.params.server_type, "server_type")?.to_string(),
        };

        let hosts = master_hosts(masters);
        if hosts.is_empty() {
            warn!("[{}] No master servers configured", game.id);
            return Ok(Vec::new());
        }

        let invocation = build_invocation(game, &hosts)?;
        debug!("[{}] Requesting server info from {} masters", game.id, hosts.len());
        let started = Instant::now();
        let report = self.run(invocation).await?;
        info!(
            "[{}] Received server info in {:.2}s",
            game.id,
            started.elapsed().as_secs_f64()
        );

        let started = Instant::now();
        let servers = parse_report(&report, &game.id, &types, &ProbeFilter::from_params(&game.params))?;
        debug!(
            "[{}] Parsed report in {:.2}ms",
            game.id,
            started.elapsed().as_secs_f64() * 1000.0
        );
        Ok(servers)
    }
}

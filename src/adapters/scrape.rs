// src/adapters/scrape.rs
use async_trait::async_trait;
use log::{debug, info, warn};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use std::sync::Arc;

use super::{Adapter, AdapterError};
use crate::models::game::{AdapterKind, GameDescriptor};
use crate::models::server::ServerInfo;
use crate::prober::{attach_latency, LatencyProbe};
use crate::utils::{parse_count, parse_flag, strip_scheme};

/// Text that separates server rows from the legend below the table.
const TRAILER_MARKER: &str = "Full server";

const COLUMNS: usize = 4;

/// Fix-ups for markup the master is known to emit.
const REPLACEMENTS: [(&str, &str); 5] = [
    (
        "<tr><td><b>Players</b></td><td><b>Type</b></td><td><b>Name</b></td><td><b>Terrain</b></td></tr>",
        "",
    ),
    ("rorserver://", ""),
    ("user:pass@", ""),
    ("<td valign='middle'>password</td>", "<td valign='middle'>True</td>"),
    ("<td valign='middle'></td>", "<td valign='middle'>False</td>"),
];

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScrapedPage {
    pub servers: Vec<ServerInfo>,
    pub trailer: Vec<String>,
}

#[derive(Default)]
struct Scanner {
    page: ScrapedPage,
    current: Option<ServerInfo>,
    column: usize,
    cell: Option<String>,
    trailer_mode: bool,
}

impl Scanner {
    fn start_tag(&mut self, tag: &BytesStart<'_>, empty: bool) {
        let name = tag.name();
        let name = name.as_ref();
        if name.eq_ignore_ascii_case(b"tr") {
            self.finish_row();
        } else if name.eq_ignore_ascii_case(b"td") {
            self.cell = Some(String::new());
            if empty {
                self.end_cell();
            }
        } else if name.eq_ignore_ascii_case(b"a") && !self.trailer_mode {
            if let (Some(server), Some(href)) = (self.current.as_mut(), href_of(tag)) {
                server.host = strip_scheme(&href).trim_matches('/').to_string();
            }
        }
    }

    fn end_tag(&mut self, name: &[u8]) {
        if name.eq_ignore_ascii_case(b"td") {
            self.end_cell();
        }
    }

    fn data(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if self.trailer_mode {
            self.page.trailer.push(text.to_string());
            return;
        }
        if text == TRAILER_MARKER {
            self.finish_row();
            self.trailer_mode = true;
            return;
        }
        if let Some(cell) = self.cell.as_mut() {
            if !cell.is_empty() {
                cell.push(' ');
            }
            cell.push_str(text);
        }
    }

    fn end_cell(&mut self) {
        let cell = match self.cell.take() {
            Some(cell) => cell,
            None => return,
        };
        if self.trailer_mode {
            return;
        }
        let server = self.current.get_or_insert_with(|| ServerInfo::new(""));
        match self.column {
            0 => {
                let mut counts = cell.splitn(2, '/');
                server.player_count = counts.next().and_then(parse_count).unwrap_or(0);
                server.player_limit = counts.next().and_then(parse_count).unwrap_or(0);
            }
            1 => server.password = parse_flag(&cell).unwrap_or(false),
            2 => server.name = cell,
            _ => server.terrain = cell,
        }
        self.column += 1;
        if self.column == COLUMNS {
            self.finish_row();
        }
    }

    fn finish_row(&mut self) {
        self.column = 0;
        if let Some(server) = self.current.take() {
            if server.host.is_empty() {
                debug!("Dropping row without a server link: {:?}", server.name);
            } else {
                self.page.servers.push(server);
            }
        }
    }
}

fn href_of(tag: &BytesStart<'_>) -> Option<String> {
    tag.attributes()
        .with_checks(false)
        .flatten()
        .find(|attr| attr.key.as_ref().eq_ignore_ascii_case(b"href"))
        .map(|attr| match attr.unescape_value() {
            Ok(value) => value.into_owned(),
            Err(_) => String::from_utf8_lossy(&attr.value).into_owned(),
        })
}

/// HTML entities the master uses beyond the XML predefined ones.
fn html_entity(name: &str) -> Option<&'static str> {
    match name {
        "nbsp" => Some(" "),
        _ => None,
    }
}

/// Scans a master server page into server rows and trailer text.
pub fn scan_server_page(page: &str) -> Result<ScrapedPage, AdapterError> {
    let mut markup = page.to_string();
    for (original, replacement) in REPLACEMENTS {
        markup = markup.replace(original, replacement);
    }

    let mut reader = Reader::from_str(&markup);
    reader.trim_text(true);
    reader.check_end_names(false);

    let mut scanner = Scanner::default();
    loop {
        match reader.read_event() {
            Ok(Event::Start(tag)) => scanner.start_tag(&tag, false),
            Ok(Event::Empty(tag)) => scanner.start_tag(&tag, true),
            Ok(Event::End(tag)) => scanner.end_tag(tag.name().as_ref()),
            Ok(Event::Text(text)) => {
                let data = match text.unescape_with(html_entity) {
                    Ok(data) => data.into_owned(),
                    Err(_) => String::from_utf8_lossy(&text).into_owned(),
                };
                scanner.data(&data);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(AdapterError::parse(
                    format!("server page at byte {}", reader.buffer_position()),
                    e,
                ))
            }
        }
    }
    scanner.finish_row();

    Ok(scanner.page)
}

/// Client for masters that publish their list as an HTML table.
pub struct ScrapeAdapter {
    client: reqwest::Client,
    prober: Arc<dyn LatencyProbe>,
}

impl ScrapeAdapter {
    pub fn new(client: reqwest::Client, prober: Arc<dyn LatencyProbe>) -> Self {
        Self { client, prober }
    }

    async fn fetch_page(&self, uri: &str) -> Result<String, AdapterError> {
        let http_error = |source| AdapterError::Http {
            uri: uri.to_string(),
            source,
        };
        self.client
            .get(uri)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(http_error)?
            .text()
            .await
            .map_err(http_error)
    }
}

pub fn page_uri(master: &str, protocol: &str) -> String {
    format!("{}/?version={}", master.trim().trim_end_matches('/'), protocol)
}

#[async_trait]
impl Adapter for ScrapeAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Scrape
    }

    async fn stat_master(
        &self,
        game: &GameDescriptor,
        masters: &[String],
    ) -> Result<Vec<ServerInfo>, AdapterError> {
        let protocol = game.params.protocol_version.as_deref().ok_or_else(|| {
            AdapterError::MissingParameter {
                game: game.id.clone(),
                param: "protocol_version",
            }
        })?;

        let mut servers = Vec::new();
        for master in masters {
            let uri = page_uri(master, protocol);
            let page = match self.fetch_page(&uri).await {
                Ok(page) => page,
                Err(e) => {
                    warn!("[{}] {}", game.id, e);
                    continue;
                }
            };

            let scraped = match scan_server_page(&page) {
                Ok(scraped) => scraped,
                Err(e) => {
                    warn!("[{}] Error parsing {}: {}", game.id, uri, e);
                    continue;
                }
            };

            info!(
                "[{}] {} servers from {} ({} trailer lines)",
                game.id,
                scraped.servers.len(),
                uri,
                scraped.trailer.len()
            );

            for mut server in scraped.servers {
                server.game_id = game.id.clone();
                server.game_type = Some(game.id.clone());
                server.master = Some(master.clone());
                servers.push(server);
            }
        }

        attach_latency(&mut servers, self.prober.as_ref()).await;
        Ok(servers)
    }
}

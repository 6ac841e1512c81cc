// src/prober.rs
use async_trait::async_trait;
use log::debug;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::task::JoinSet;

use crate::config::Config;
use crate::models::server::{ServerInfo, LATENCY_UNKNOWN};

/// Measures round-trip time to a set of hosts.
#[async_trait]
pub trait LatencyProbe: Send + Sync {
    /// Resolves every host to a latency in milliseconds, `LATENCY_UNKNOWN` when unreachable.
    async fn probe(&self, hosts: HashSet<String>) -> HashMap<String, u32>;
}

/// Runs the system `ping` once per host from a bounded pool of workers.
#[derive(Clone)]
pub struct Pinger {
    program: String,
    base_args: Vec<String>,
    workers: usize,
    timeout: Duration,
}

impl Pinger {
    /// `command` may carry leading arguments, e.g. `"sudo ping"`.
    pub fn new(command: impl AsRef<str>, workers: usize, timeout: Duration) -> Self {
        let mut parts = command.as_ref().split_whitespace().map(str::to_string);
        let program = parts.next().unwrap_or_else(|| "ping".to_string());
        Self {
            program,
            base_args: parts.collect(),
            workers: workers.max(1),
            timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.ping_command,
            config.ping_workers,
            Duration::from_secs(config.ping_timeout_secs),
        )
    }

    fn ping_args(&self, host: &str) -> Vec<String> {
        if cfg!(windows) {
            vec![
                "-n".to_string(),
                "1".to_string(),
                "-w".to_string(),
                self.timeout.as_millis().to_string(),
                host.to_string(),
            ]
        } else {
            vec![
                "-c".to_string(),
                "1".to_string(),
                "-n".to_string(),
                "-W".to_string(),
                self.timeout.as_secs().max(1).to_string(),
                host.to_string(),
            ]
        }
    }

    async fn ping(&self, host: &str) -> u32 {
        if !is_pingable(host) {
            debug!("Refusing to ping malformed host {:?}", host);
            return LATENCY_UNKNOWN;
        }

        let child = Command::new(&self.program)
            .args(&self.base_args)
            .args(self.ping_args(host))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                debug!("Failed to spawn {} for {}: {}", self.program, host, e);
                return LATENCY_UNKNOWN;
            }
        };

        let deadline = self.timeout + Duration::from_secs(1);
        match tokio::time::timeout(deadline, child.wait_with_output()).await {
            Ok(Ok(output)) => parse_rtt(&String::from_utf8_lossy(&output.stdout)),
            Ok(Err(e)) => {
                debug!("Ping for {} failed: {}", host, e);
                LATENCY_UNKNOWN
            }
            Err(_) => {
                debug!("Ping for {} timed out", host);
                LATENCY_UNKNOWN
            }
        }
    }
}

#[async_trait]
impl LatencyProbe for Pinger {
    async fn probe(&self, hosts: HashSet<String>) -> HashMap<String, u32> {
        if hosts.is_empty() {
            return HashMap::new();
        }

        let worker_count = self.workers.min(hosts.len());
        let queue = Arc::new(Mutex::new(hosts.into_iter().collect::<Vec<String>>()));
        let results = Arc::new(Mutex::new(HashMap::new()));
        let pinger = Arc::new(self.clone());

        let mut workers = JoinSet::new();
        for _ in 0..worker_count {
            let queue = Arc::clone(&queue);
            let results = Arc::clone(&results);
            let pinger = Arc::clone(&pinger);
            workers.spawn(async move {
                loop {
                    let host = match queue.lock().pop() {
                        Some(host) => host,
                        None => break,
                    };
                    let rtt = pinger.ping(&host).await;
                    results.lock().insert(host, rtt);
                }
            });
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                debug!("Ping worker ended abnormally: {}", e);
            }
        }

        let mut results = std::mem::take(&mut *results.lock());
        // hosts left behind by a crashed worker still get an answer
        for host in queue.lock().drain(..) {
            results.insert(host, LATENCY_UNKNOWN);
        }
        results
    }
}

/// Whether `host` is an IP address or a syntactically valid hostname.
/// Anything else, notably text starting with `-`, never reaches ping's argv.
pub fn is_pingable(host: &str) -> bool {
    if host.parse::<IpAddr>().is_ok() {
        return true;
    }
    if host.is_empty() || host.len() > 253 {
        return false;
    }
    host.trim_end_matches('.').split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

/// Extracts the round-trip time from `ping` output, rounded to whole milliseconds.
pub fn parse_rtt(output: &str) -> u32 {
    for line in output.lines() {
        if let Some(idx) = line.find("time=").or_else(|| line.find("time<")) {
            let value: String = line[idx + 5..]
                .chars()
                .take_while(|c| c.is_ascii_digit() || *c == '.')
                .collect();
            if let Ok(ms) = value.parse::<f64>() {
                return ms.round() as u32;
            }
        }
        if let Some(idx) = line.find("Average = ") {
            let value: String = line[idx + 10..]
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            if let Ok(ms) = value.parse::<u32>() {
                return ms;
            }
        }
    }
    LATENCY_UNKNOWN
}

/// Probes every distinct address in `servers` once and writes the results back.
pub async fn attach_latency(servers: &mut [ServerInfo], prober: &dyn LatencyProbe) {
    let hosts: HashSet<String> = servers.iter().map(|s| s.address().to_string()).collect();
    if hosts.is_empty() {
        return;
    }
    let latencies = prober.probe(hosts).await;
    for server in servers.iter_mut() {
        server.ping = latencies
            .get(server.address())
            .copied()
            .unwrap_or(LATENCY_UNKNOWN);
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    const LINUX_OUTPUT: &str = "PING 10.0.0.1 (10.0.0.1) 56(84) bytes of data.\n\
        64 bytes from 10.0.0.1: icmp_seq=1 ttl=64 time=23.6 ms\n\n\
        --- 10.0.0.1 ping statistics ---\n";

    const WINDOWS_OUTPUT: &str = "Reply from 10.0.0.1: bytes=32 time<1ms TTL=128\n\
        Minimum = 0ms, Maximum = 0ms, Average = 0ms\n";

    #[test]
    fn parses_linux_rtt() {
        assert_eq!(parse_rtt(LINUX_OUTPUT), 24);
    }

    #[test]
    fn parses_sub_millisecond_rtt() {
        assert_eq!(parse_rtt(WINDOWS_OUTPUT), 1);
    }

    #[test]
    fn unparseable_output_is_unknown() {
        assert_eq!(parse_rtt(""), LATENCY_UNKNOWN);
        assert_eq!(parse_rtt("Request timed out."), LATENCY_UNKNOWN);
    }

    #[tokio::test]
    async fn missing_ping_binary_yields_sentinel() {
        let pinger = Pinger::new("/nonexistent/ping-binary", 4, Duration::from_secs(1));
        let hosts: HashSet<String> = ["10.0.0.1", "10.0.0.2"].iter().map(|s| s.to_string()).collect();
        let result = pinger.probe(hosts).await;
        assert_eq!(result.len(), 2);
        assert!(result.values().all(|&ms| ms == LATENCY_UNKNOWN));
    }

    #[tokio::test]
    async fn empty_input_yields_empty_map() {
        let pinger = Pinger::new("ping", 4, Duration::from_secs(1));
        assert!(pinger.probe(HashSet::new()).await.is_empty());
    }

    struct CountingProbe {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LatencyProbe for CountingProbe {
        async fn probe(&self, hosts: HashSet<String>) -> HashMap<String, u32> {
            let mut calls = self.calls.lock();
            hosts
                .into_iter()
                .map(|h| {
                    calls.push(h.clone());
                    let ms = if h == "10.0.0.1" { 40 } else { LATENCY_UNKNOWN };
                    (h, ms)
                })
                .collect()
        }
    }

    #[tokio::test]
    async fn attach_latency_probes_each_address_once() {
        let probe = CountingProbe { calls: Mutex::new(Vec::new()) };
        let mut servers = vec![
            ServerInfo::new("10.0.0.1:30000"),
            ServerInfo::new("10.0.0.1:30001"),
            ServerInfo::new("10.0.0.2:30000"),
        ];
        attach_latency(&mut servers, &probe).await;

        let mut calls = probe.calls.lock().clone();
        calls.sort();
        assert_eq!(calls, vec!["10.0.0.1", "10.0.0.2"]);
        assert_eq!(servers[0].ping, 40);
        assert_eq!(servers[1].ping, 40);
        assert_eq!(servers[2].ping, LATENCY_UNKNOWN);
    }

    #[test]
    fn option_like_hosts_are_not_pingable() {
        assert!(is_pingable("10.0.0.1"));
        assert!(is_pingable("2001:db8::1"));
        assert!(is_pingable("master.ioquake3.org"));
        assert!(!is_pingable("-f"));
        assert!(!is_pingable("-c100"));
        assert!(!is_pingable("host name"));
        assert!(!is_pingable("a;rm"));
        assert!(!is_pingable(""));
    }

    #[cfg(unix)]
    struct FakePing {
        script: std::path::PathBuf,
        log: std::path::PathBuf,
    }

    #[cfg(unix)]
    impl FakePing {
        /// `body` runs after the host (last argument) is appended to the log.
        fn new(name: &str, body: &str) -> Self {
            let dir = std::env::temp_dir();
            let script = dir.join(format!("{}-{}.sh", name, std::process::id()));
            let log = dir.join(format!("{}-{}.log", name, std::process::id()));
            let _ = std::fs::remove_file(&log);
            let text = format!(
                "for a in \"$@\"; do last=$a; done\necho \"$last\" >> {}\n{}\n",
                log.display(),
                body
            );
            std::fs::write(&script, text).unwrap();
            Self { script, log }
        }

        fn pinger(&self, workers: usize, timeout: Duration) -> Pinger {
            Pinger::new(format!("sh {}", self.script.display()), workers, timeout)
        }

        fn hosts_seen(&self) -> Vec<String> {
            let mut seen: Vec<String> = std::fs::read_to_string(&self.log)
                .unwrap_or_default()
                .lines()
                .map(str::to_string)
                .collect();
            seen.sort();
            seen
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn every_host_is_pinged_exactly_once() {
        let fake = FakePing::new(
            "fake-ping-count",
            "echo \"64 bytes from x: icmp_seq=1 ttl=64 time=12.3 ms\"",
        );
        let hosts: HashSet<String> = (1..=12).map(|i| format!("10.0.0.{}", i)).collect();
        let result = fake.pinger(3, Duration::from_secs(2)).probe(hosts.clone()).await;

        assert_eq!(result.len(), 12);
        assert!(result.values().all(|&ms| ms == 12));
        let mut expected: Vec<String> = hosts.into_iter().collect();
        expected.sort();
        assert_eq!(fake.hosts_seen(), expected);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn ping_past_deadline_yields_sentinel() {
        let fake = FakePing::new("fake-ping-hang", "sleep 10");
        let hosts: HashSet<String> = ["10.0.0.1".to_string()].into_iter().collect();
        let started = std::time::Instant::now();
        let result = fake.pinger(2, Duration::from_secs(1)).probe(hosts).await;

        assert_eq!(result.get("10.0.0.1"), Some(&LATENCY_UNKNOWN));
        assert_eq!(fake.hosts_seen(), vec!["10.0.0.1"]);
        assert!(started.elapsed() < Duration::from_secs(8));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn malformed_hosts_never_reach_ping() {
        let fake = FakePing::new(
            "fake-ping-argv",
            "echo \"64 bytes from x: icmp_seq=1 ttl=64 time=5 ms\"",
        );
        let hosts: HashSet<String> = ["-f".to_string(), "10.0.0.1".to_string()].into_iter().collect();
        let result = fake.pinger(4, Duration::from_secs(2)).probe(hosts).await;

        assert_eq!(result.get("-f"), Some(&LATENCY_UNKNOWN));
        assert_eq!(result.get("10.0.0.1"), Some(&5));
        assert_eq!(fake.hosts_seen(), vec!["10.0.0.1"]);
    }
}

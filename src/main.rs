use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;

use rtelpush::config::{LINE_TERMINATOR, PushConfig};
use rtelpush::dispatch::{Dispatcher, RunReport};
use rtelpush::session::{Connector, DeliveryRecorder, RecordLevel, TelnetConnector};

#[derive(Parser)]
#[command(name = "rtelpush")]
#[command(about = "Push a configuration batch to a fleet of Telnet devices.")]
pub struct CommandLine {
    /// JSON configuration file; flags override its values
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Log host used by the default `logging` command
    #[arg(long)]
    pub host_ip: Option<String>,
    /// Number of devices
    #[arg(short = 'n', long)]
    pub device_count: Option<u16>,
    /// Telnet address shared by the devices
    #[arg(short, long)]
    pub target_ip: Option<String>,
    /// Device N listens on BASE_PORT + N
    #[arg(short, long)]
    pub base_port: Option<u16>,
    /// Command to send; repeat to build the batch (replaces the default one)
    #[arg(long = "command", value_name = "LINE")]
    pub commands: Vec<String>,
    /// Connect timeout in seconds, 0 disables it
    #[arg(long, value_name = "SECS")]
    pub connect_timeout: Option<u64>,
    /// Per-command write timeout in seconds, 0 disables it
    #[arg(long, value_name = "SECS")]
    pub write_timeout: Option<u64>,
    /// Write a JSONL record of the run to this file
    #[arg(long, value_name = "PATH")]
    pub record: Option<PathBuf>,
    /// Print targets and commands without connecting
    #[arg(long)]
    pub dry_run: bool,
    /// Print the JSON schema of the configuration file and exit
    #[arg(long)]
    pub print_schema: bool,
}

impl CommandLine {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Defaults, then the config file, then flags.
    fn load_config(&self) -> anyhow::Result<PushConfig> {
        let mut cfg = match &self.config {
            Some(path) => PushConfig::from_json_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => PushConfig::default(),
        };

        if let Some(host_ip) = &self.host_ip {
            cfg.host_ip = host_ip.clone();
        }
        if let Some(count) = self.device_count {
            cfg.device_count = count;
        }
        if let Some(target_ip) = &self.target_ip {
            cfg.target_ip = target_ip.clone();
        }
        if let Some(port) = self.base_port {
            cfg.base_port = port;
        }
        if !self.commands.is_empty() {
            cfg.commands = Some(self.commands.clone());
        }
        if let Some(secs) = self.connect_timeout {
            cfg.connect_timeout_secs = (secs > 0).then_some(secs);
        }
        if let Some(secs) = self.write_timeout {
            cfg.write_timeout_secs = (secs > 0).then_some(secs);
        }
        Ok(cfg)
    }
}

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stdout)
        .format_target(false)
        .init();
}

fn print_plan<C: Connector>(dispatcher: &Dispatcher<C>) {
    let plan = dispatcher.plan();
    println!(
        "dry-run targets={} commands={}",
        dispatcher.targets().len(),
        plan.commands.len()
    );
    for target in dispatcher.targets() {
        println!("  target[{}] {}", target.index, target);
    }
    for (idx, command) in plan.commands.iter().enumerate() {
        println!("  command[{idx}] {:?}", format!("{command}{LINE_TERMINATOR}"));
    }
}

/// Every target received the full batch.
const EXIT_DELIVERED: u8 = 0;
/// At least one target failed.
const EXIT_TARGET_FAILED: u8 = 1;
/// The run could not start (configuration or usage error).
const EXIT_USAGE: u8 = 2;

/// Prints each failure to stderr and maps the report to the exit status.
fn report_status(report: &RunReport) -> u8 {
    for failure in &report.failures {
        eprintln!("{}", failure.error);
    }
    if report.is_success() {
        EXIT_DELIVERED
    } else {
        EXIT_TARGET_FAILED
    }
}

fn write_record(path: &Path, recorder: &DeliveryRecorder) -> anyhow::Result<()> {
    std::fs::write(path, recorder.to_jsonl()?)
        .with_context(|| format!("writing record to {}", path.display()))
}

async fn run<C: Connector>(args: CommandLine, connector: C) -> anyhow::Result<u8> {
    if args.print_schema {
        println!("{}", PushConfig::json_schema()?);
        return Ok(EXIT_DELIVERED);
    }

    let cfg = args.load_config()?;
    let mut dispatcher = Dispatcher::new(connector, &cfg)?;

    if args.dry_run {
        print_plan(&dispatcher);
        return Ok(EXIT_DELIVERED);
    }

    let recorder = args
        .record
        .as_ref()
        .map(|_| DeliveryRecorder::new(RecordLevel::Full));
    if let Some(recorder) = &recorder {
        dispatcher = dispatcher.with_recorder(recorder.clone());
    }

    let report = dispatcher.run().await;
    let status = report_status(&report);

    // A record write failure does not change the exit status.
    if let (Some(path), Some(recorder)) = (&args.record, &recorder)
        && let Err(err) = write_record(path, recorder)
    {
        eprintln!("warning: {err:#}");
    }

    Ok(status)
}

/// Final exit status, printing startup errors.
fn exit_status(result: anyhow::Result<u8>) -> u8 {
    result.unwrap_or_else(|err| {
        eprintln!("error: {err:#}");
        EXIT_USAGE
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CommandLine::parse_args();
    init_logging();

    ExitCode::from(exit_status(run(args, TelnetConnector).await))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtelpush::error::PushError;
    use rtelpush::session::Session;
    use std::io;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[test]
    fn flags_override_defaults() {
        let args = CommandLine::parse_from([
            "rtelpush",
            "-n",
            "3",
            "--target-ip",
            "10.0.0.5",
            "--command",
            "config t",
            "--command",
            "end",
            "--connect-timeout",
            "0",
        ]);
        let cfg = args.load_config().expect("config");

        assert_eq!(cfg.device_count, 3);
        assert_eq!(cfg.target_ip, "10.0.0.5");
        assert_eq!(cfg.command_batch(), ["config t", "end"]);
        assert_eq!(cfg.connect_timeout_secs, None);
        assert_eq!(cfg.write_timeout_secs, PushConfig::default().write_timeout_secs);
    }

    #[test]
    fn no_flags_keep_defaults() {
        let args = CommandLine::parse_from(["rtelpush"]);
        assert_eq!(args.load_config().expect("config"), PushConfig::default());
    }

    /// Accepts and drains one connection. Returns the bound address's port.
    async fn listening_device() -> (u16, tokio::task::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("local addr").port();
        let device = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut received = Vec::new();
            socket.read_to_end(&mut received).await.expect("read");
            received
        });
        (port, device)
    }

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        listener.local_addr().expect("local addr").port()
    }

    fn single_device_args(port: u16, extra: &[&str]) -> CommandLine {
        let base_port = (port - 1).to_string();
        let mut argv = vec![
            "rtelpush",
            "-n",
            "1",
            "--target-ip",
            "127.0.0.1",
            "--base-port",
            base_port.as_str(),
        ];
        argv.extend_from_slice(extra);
        CommandLine::parse_from(argv)
    }

    /// Refuses one address and accepts every other one without I/O.
    struct RefusingConnector(&'static str);

    struct NullSession;

    impl Connector for RefusingConnector {
        type Session = NullSession;

        async fn connect(&self, addr: &str) -> Result<NullSession, PushError> {
            if addr == self.0 {
                return Err(PushError::Connect {
                    addr: addr.to_string(),
                    source: io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"),
                });
            }
            Ok(NullSession)
        }
    }

    impl Session for NullSession {
        async fn write_line(&mut self, _line: &str) -> io::Result<()> {
            Ok(())
        }

        async fn close(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn delivered_run_exits_zero() {
        let (port, device) = listening_device().await;

        let status = exit_status(run(single_device_args(port, &[]), TelnetConnector).await);

        assert_eq!(status, EXIT_DELIVERED);
        assert_eq!(
            device.await.expect("device task"),
            b"config t\r\nlogging 192.168.1.61\r\nend\r\nwr mem\r\n"
        );
    }

    #[tokio::test]
    async fn refused_target_exits_one() {
        let port = closed_port().await;

        let status = exit_status(run(single_device_args(port, &[]), TelnetConnector).await);

        assert_eq!(status, EXIT_TARGET_FAILED);
    }

    #[tokio::test]
    async fn one_refused_device_of_three_exits_one() {
        let args = CommandLine::parse_from([
            "rtelpush",
            "-n",
            "3",
            "--target-ip",
            "10.0.0.5",
            "--base-port",
            "5000",
        ]);
        let cfg = args.load_config().expect("config");
        let report = Dispatcher::new(RefusingConnector("10.0.0.5:5002"), &cfg)
            .expect("dispatcher")
            .run()
            .await;

        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].error.to_string().contains("10.0.0.5:5002"));
        assert_eq!(report_status(&report), EXIT_TARGET_FAILED);

        let status = exit_status(run(args, RefusingConnector("10.0.0.5:5002")).await);
        assert_eq!(status, EXIT_TARGET_FAILED);
    }

    #[tokio::test]
    async fn zero_devices_exits_two() {
        let args = CommandLine::parse_from(["rtelpush", "-n", "0"]);

        let status = exit_status(run(args, RefusingConnector("unused:1")).await);

        assert_eq!(status, EXIT_USAGE);
    }

    #[tokio::test]
    async fn unwritable_record_keeps_the_failure_status() {
        let port = closed_port().await;
        let args = single_device_args(port, &["--record", "/nonexistent-dir/run.jsonl"]);

        let result = run(args, TelnetConnector).await;

        assert_eq!(result.expect("run completes"), EXIT_TARGET_FAILED);
    }

    #[tokio::test]
    async fn unwritable_record_keeps_the_success_status() {
        let (port, device) = listening_device().await;
        let args = single_device_args(port, &["--record", "/nonexistent-dir/run.jsonl"]);

        let result = run(args, TelnetConnector).await;

        assert_eq!(result.expect("run completes"), EXIT_DELIVERED);
        device.await.expect("device task");
    }
}

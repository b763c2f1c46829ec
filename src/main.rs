// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

// XMODEM send/receive over a serial port
use clap::{Parser, Subcommand};
use log::{info, warn};
use serialport::{DataBits, FlowControl, Parity, StopBits};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};
use xmlink::{BlockSize, CancelToken, PortSettings, RealSerialPort, TransferConfig, TransferSummary};

const EXIT_SETUP: u8 = 1;
const EXIT_SEND_FAILED: u8 = 2;
const EXIT_REFUSED: u8 = 3;
const EXIT_RECV_FAILED: u8 = 4;

#[derive(Parser)]
#[command(name = "xmlink")]
#[command(about = "XMODEM/XMODEM-1k file transfer over a serial port", long_about = None)]
#[command(disable_help_subcommand = true)]
struct Cli {
    /// Serial port to use (e.g., /dev/ttyUSB0 or COM1)
    #[arg(short, long)]
    port: String,

    /// Baud rate
    #[arg(short, long, default_value = "115200")]
    baud: u32,

    /// Data bits (5, 6, 7, or 8)
    #[arg(long, default_value = "8", value_name = "BITS")]
    data_bits: u8,

    /// Parity (none, odd, or even)
    #[arg(long, default_value = "none")]
    parity: String,

    /// Stop bits (1 or 2)
    #[arg(long, default_value = "1", value_name = "BITS")]
    stop_bits: u8,

    /// Flow control (none, software, or hardware)
    #[arg(long, default_value = "none")]
    flow_control: String,

    /// Seconds to wait for each response from the peer
    #[arg(long, default_value = "3.0", value_name = "SECS")]
    timeout: f64,

    /// Attempts per block before giving up
    #[arg(long, default_value = "16", value_name = "COUNT")]
    retry: u32,

    /// Send 1024-byte blocks (XMODEM-1k)
    #[arg(long = "1k")]
    one_k: bool,

    /// Enable debug output
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a file using XMODEM
    Send {
        /// File to send
        file: PathBuf,
    },
    /// Receive a file using XMODEM
    Recv {
        /// Output file path
        #[arg(short, long)]
        out: PathBuf,

        /// Overwrite the output file if it exists
        #[arg(short, long)]
        force: bool,

        /// Expected file size; trailing padding past it is dropped
        #[arg(long, value_name = "BYTES")]
        length: Option<u64>,
    },
}

/// Message and exit status of a failed run.
struct Failure {
    code: u8,
    message: String,
}

impl Failure {
    fn new(code: u8, message: impl Into<String>) -> Self {
        Failure { code, message: message.into() }
    }
}

fn parse_data_bits(bits: u8) -> Result<DataBits, String> {
    match bits {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        _ => Err(format!("Invalid data bits: {}. Must be 5, 6, 7, or 8", bits)),
    }
}

fn parse_parity(parity: &str) -> Result<Parity, String> {
    match parity.to_lowercase().as_str() {
        "none" => Ok(Parity::None),
        "odd" => Ok(Parity::Odd),
        "even" => Ok(Parity::Even),
        _ => Err(format!("Invalid parity: {}. Must be 'none', 'odd', or 'even'", parity)),
    }
}

fn parse_stop_bits(bits: u8) -> Result<StopBits, String> {
    match bits {
        1 => Ok(StopBits::One),
        2 => Ok(StopBits::Two),
        _ => Err(format!("Invalid stop bits: {}. Must be 1 or 2", bits)),
    }
}

fn parse_flow_control(flow: &str) -> Result<FlowControl, String> {
    match flow.to_lowercase().as_str() {
        "none" => Ok(FlowControl::None),
        "software" | "xonxoff" => Ok(FlowControl::Software),
        "hardware" | "rtscts" => Ok(FlowControl::Hardware),
        _ => Err(format!("Invalid flow control: {}. Must be 'none', 'software', or 'hardware'", flow)),
    }
}

fn parse_timeout(secs: f64) -> Result<Duration, String> {
    if secs.is_nan() || secs <= 0.0 {
        return Err(format!("Invalid timeout: {}. Must be greater than zero", secs));
    }
    Duration::try_from_secs_f64(secs).map_err(|e| format!("Invalid timeout: {}: {}", secs, e))
}

fn port_settings(cli: &Cli) -> Result<PortSettings, String> {
    Ok(PortSettings {
        baud_rate: cli.baud,
        data_bits: parse_data_bits(cli.data_bits)?,
        parity: parse_parity(&cli.parity)?,
        stop_bits: parse_stop_bits(cli.stop_bits)?,
        flow_control: parse_flow_control(&cli.flow_control)?,
    })
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(failure) => {
            eprintln!("Error: {}", failure.message);
            ExitCode::from(failure.code)
        }
    }
}

fn run(cli: Cli) -> Result<(), Failure> {
    let settings = port_settings(&cli).map_err(|e| Failure::new(EXIT_SETUP, e))?;
    let timeout = parse_timeout(cli.timeout).map_err(|e| Failure::new(EXIT_SETUP, e))?;
    let block_size = if cli.one_k { BlockSize::OneK } else { BlockSize::Standard };
    let config = TransferConfig::default()
        .with_block_size(block_size)
        .with_retry_limit(cli.retry)
        .with_timeout(timeout);

    info!("Opening serial port: {}", cli.port);
    info!(
        "Settings: {} baud, {:?}, {:?}, {:?}, {:?} flow control",
        settings.baud_rate, settings.data_bits, settings.parity, settings.stop_bits, settings.flow_control
    );

    let mut serial_port = RealSerialPort::open(&cli.port, &settings)
        .map_err(|e| Failure::new(EXIT_SETUP, format!("Failed to open serial port {}: {}", cli.port, e)))?;
    if let Err(e) = serial_port.clear_buffers() {
        warn!("Could not clear serial buffers: {}", e);
    }

    match cli.command {
        Commands::Send { file } => send_file(serial_port, &file, &config),
        Commands::Recv { out, force, length } => {
            receive_file(serial_port, &out, force, &config.with_expected_length(length))
        }
    }
}

fn send_file(serial_port: RealSerialPort, file: &Path, config: &TransferConfig) -> Result<(), Failure> {
    let source = File::open(file)
        .map_err(|e| Failure::new(EXIT_SETUP, format!("Cannot open {}: {}", file.display(), e)))?;
    let size = source.metadata().map(|m| m.len()).unwrap_or(0);

    info!("Sending {} ({}), waiting for receiver...", file.display(), human(size as f64));
    let start = Instant::now();

    match xmlink::send(Box::new(serial_port), Box::new(source), config, CancelToken::new()) {
        Ok(summary) => {
            report("Sent", &summary, start.elapsed());
            Ok(())
        }
        Err(e) if e.is_soft() => {
            warn!("{}", e);
            println!("Sent {} but the receiver never confirmed the end of transfer", human(size as f64));
            Ok(())
        }
        Err(e) => Err(Failure::new(EXIT_SEND_FAILED, format!("Send failed: {}", e))),
    }
}

fn receive_file(serial_port: RealSerialPort, out: &Path, force: bool, config: &TransferConfig) -> Result<(), Failure> {
    if out.exists() && !force {
        return Err(Failure::new(
            EXIT_REFUSED,
            format!("Refusing to overwrite existing file: {} (use --force)", out.display()),
        ));
    }

    let partial = partial_path(out);
    let sink = File::create(&partial)
        .map_err(|e| Failure::new(EXIT_SETUP, format!("Cannot create {}: {}", partial.display(), e)))?;

    info!("Receiving into {}", out.display());
    let start = Instant::now();

    // The sink is dropped, and the file closed, before `receive` returns
    match xmlink::receive(Box::new(serial_port), Box::new(sink), config, CancelToken::new()) {
        Ok(summary) if summary.bytes > 0 => {
            fs::rename(&partial, out).map_err(|e| {
                Failure::new(EXIT_RECV_FAILED, format!("Cannot move {} into place: {}", partial.display(), e))
            })?;
            report("Received", &summary, start.elapsed());
            Ok(())
        }
        Ok(_) => {
            discard(&partial);
            Err(Failure::new(EXIT_RECV_FAILED, "Receive failed: no data"))
        }
        Err(e) => {
            discard(&partial);
            Err(Failure::new(EXIT_RECV_FAILED, format!("Receive failed: {}", e)))
        }
    }
}

fn partial_path(out: &Path) -> PathBuf {
    let mut name = out.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

fn discard(partial: &Path) {
    if let Err(e) = fs::remove_file(partial) {
        warn!("Could not remove {}: {}", partial.display(), e);
    }
}

fn report(verb: &str, summary: &TransferSummary, elapsed: Duration) {
    let secs = elapsed.as_secs_f64().max(1e-6);
    let bytes = summary.bytes as f64;
    println!("{} {} in {:.2}s  (~{}/s)", verb, human(bytes), secs, human(bytes / secs));
    info!(
        "{} blocks of {} bytes, {} mode, {} retransmissions",
        summary.blocks,
        summary.block_size.payload_len(),
        summary.mode,
        summary.retransmissions
    );
}

fn human(mut n: f64) -> String {
    for unit in ["B", "KB", "MB", "GB"] {
        if n < 1024.0 {
            return format!("{:.1} {}", n, unit);
        }
        n /= 1024.0;
    }
    format!("{:.1} TB", n)
}

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

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use serialport::{DataBits, Parity, StopBits};
use tracing::{error, info};
use xymodem::{
    receive_files, send_files, AbortFlag, LogProgress, ProtocolVariant, RealSerialPort, TransferConfig,
    TransferOptions,
};

#[derive(Parser)]
#[command(name = "xymodem")]
#[command(about = "XMODEM/YMODEM file transfer over RS-232", long_about = None)]
#[command(disable_help_subcommand = true)]
struct Cli {
    /// Serial port to use (e.g., /dev/ttyUSB0 or COM1)
    #[arg(short, long)]
    port: String,

    /// Baud rate
    #[arg(short, long, default_value = "9600")]
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

    /// Protocol variant
    #[arg(short = 'P', long, value_enum, default_value_t = Protocol::Ymodem)]
    protocol: Protocol,

    /// Text mode: convert line endings and strip SUB padding
    #[arg(short, long)]
    text: bool,

    /// Seconds to wait for the peer's handshake or acknowledgement
    #[arg(long, default_value = "60", value_name = "SECS")]
    timeout: u64,

    /// Retries per block before giving up
    #[arg(long, default_value = "10")]
    retries: u32,

    /// Delay in milliseconds between sending each byte of a data block
    #[arg(long, default_value = "0", value_name = "MS")]
    byte_delay: u8,

    /// Enable debug output
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Protocol {
    /// XMODEM with an 8-bit checksum
    Xmodem,
    /// XMODEM with CRC-16
    XmodemCrc,
    /// YMODEM batch, 128-byte blocks
    Ymodem,
    /// YMODEM batch, 1K blocks
    Ymodem1k,
    /// YMODEM-G streaming (error-free links only)
    YmodemG,
}

impl From<Protocol> for ProtocolVariant {
    fn from(protocol: Protocol) -> Self {
        match protocol {
            Protocol::Xmodem => ProtocolVariant::Xmodem,
            Protocol::XmodemCrc => ProtocolVariant::XmodemCrc,
            Protocol::Ymodem => ProtocolVariant::YmodemCrc,
            Protocol::Ymodem1k => ProtocolVariant::Ymodem1k,
            Protocol::YmodemG => ProtocolVariant::YmodemG,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Send one file (XMODEM) or a batch of files (YMODEM)
    Send {
        /// Files to send
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Receive a file (XMODEM) or a batch of files (YMODEM)
    Receive {
        /// Output file for XMODEM, output directory for YMODEM
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },
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

fn init_logging(debug: bool) {
    let level = if debug { tracing::Level::DEBUG } else { tracing::Level::INFO };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .init();
}

fn line_settings(cli: &Cli) -> Result<(DataBits, Parity, StopBits), String> {
    Ok((
        parse_data_bits(cli.data_bits)?,
        parse_parity(&cli.parity)?,
        parse_stop_bits(cli.stop_bits)?,
    ))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let (data_bits, parity, stop_bits) = match line_settings(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    info!("Opening serial port: {}", cli.port);
    info!("Settings: {} baud, {:?}, {:?}, {:?}", cli.baud, data_bits, parity, stop_bits);

    let serial_port = match RealSerialPort::open(&cli.port, cli.baud, data_bits, parity, stop_bits) {
        Ok(port) => Box::new(port),
        Err(e) => {
            error!("Failed to open serial port: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let abort = AbortFlag::new();
    let handler_flag = abort.clone();
    if let Err(e) = ctrlc::set_handler(move || handler_flag.request_abort()) {
        error!("Failed to install Ctrl-C handler: {}", e);
        return ExitCode::FAILURE;
    }

    let timeout = Duration::from_secs(cli.timeout);
    let config = TransferConfig {
        handshake_timeout: timeout,
        ack_timeout: timeout,
        eot_timeout: timeout,
        max_retries: cli.retries,
        inter_byte_delay: Duration::from_millis(cli.byte_delay.into()),
        ..TransferConfig::default()
    };
    let options = TransferOptions::new()
        .config(config)
        .text_mode(cli.text)
        .abort(abort)
        .progress(Arc::new(LogProgress::default()));
    let variant = ProtocolVariant::from(cli.protocol);

    let result = match &cli.command {
        Commands::Send { files } => send_files(serial_port, variant, files, &options),
        Commands::Receive { output } => receive_files(serial_port, variant, output, &options),
    };

    match result {
        Ok(true) => {
            info!("Transfer complete");
            ExitCode::SUCCESS
        }
        Ok(false) => {
            info!("Transfer cancelled");
            ExitCode::from(130)
        }
        Err(e) => {
            error!("Transfer failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

// Copyright 2024-2026 StegoChannel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A development aid for manually exercising the engine without a live feed
//! (§6.6): key generation, signal-post diagnosis, and frame round trips.
//! Not a product surface — no persistence, no networking beyond the
//! beacon fetch `signal` needs.

use clap::{Parser, Subcommand};
use rand::RngCore;
use stegochannel::beacon::{BeaconKind, BeaconOracle, HttpBeaconSource};
use stegochannel::channel::{format_textual_key, parse_textual_key};
use stegochannel::config::EngineConfig;
use stegochannel::crypto::SecretKey;
use stegochannel::features::FeatureKind;
use stegochannel::frame::{decode_frame, encode_frame};
use stegochannel::selector::{is_signal_post, selection_threshold, selection_value};

#[derive(Parser)]
#[command(name = "stegoctl", about = "Manual inspection tool for the stegochannel engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print a fresh textual channel key.
    Keygen {
        #[arg(long, default_value = "date")]
        beacon: String,
        #[arg(long, default_value_t = 0.25)]
        rate: f64,
    },
    /// Report whether a post id would be a signal post right now.
    Signal { channel_key: String, post_id: String },
    /// Encode a message into a frame's MSB-first bit stream.
    Encode {
        channel_key: String,
        message: String,
        #[arg(long)]
        encrypted: bool,
        #[arg(long, default_value_t = 0)]
        seq: u64,
    },
    /// Decode a frame's bit stream (one '0'/'1' ASCII char per bit, stdin).
    Decode {
        channel_key: String,
        #[arg(long, default_value_t = 0)]
        seq: u64,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Keygen { beacon, rate } => {
            let beacon_kind = BeaconKind::parse(&beacon).ok_or_else(|| anyhow::anyhow!("unknown beacon kind {beacon:?}"))?;
            let mut bytes = [0u8; 32];
            rand::thread_rng().fill_bytes(&mut bytes);
            let key = SecretKey::new(bytes);
            let text = format_textual_key(&key, beacon_kind, rate, &[FeatureKind::Len, FeatureKind::Media, FeatureKind::Qmark]);
            println!("{text}");
        }

        Command::Signal { channel_key, post_id } => {
            let (key, beacon_kind, rate, _features) = parse_textual_key(&channel_key)?;
            let oracle = BeaconOracle::new(Box::new(default_http_source()));
            let beacon_value = oracle.get_beacon_value(beacon_kind).await?;
            let epoch_key = stegochannel::epoch::derive_epoch_key(&key, beacon_kind.id(), &beacon_value);
            let value = selection_value(&epoch_key, &post_id);
            let threshold = selection_threshold(rate);
            let signal = is_signal_post(&epoch_key, &post_id, rate);
            println!("beacon_value = {beacon_value}");
            println!("selection_value  = {value:#018x}");
            println!("selection_threshold = {threshold:#018x}");
            println!("is_signal_post = {signal}");
        }

        Command::Encode {
            channel_key,
            message,
            encrypted,
            seq,
        } => {
            let (key, beacon_kind, _rate, _features) = parse_textual_key(&channel_key)?;
            let oracle = BeaconOracle::new(Box::new(default_http_source()));
            let beacon_value = oracle.get_beacon_value(beacon_kind).await?;
            let epoch_key = stegochannel::epoch::derive_epoch_key(&key, beacon_kind.id(), &beacon_value);
            let bits = encode_frame(message.as_bytes(), &epoch_key, encrypted, seq)?;
            let rendered: String = bits.iter().map(|b| if *b == 0 { '0' } else { '1' }).collect();
            println!("{rendered}");
        }

        Command::Decode { channel_key, seq } => {
            let (key, beacon_kind, _rate, _features) = parse_textual_key(&channel_key)?;
            let oracle = BeaconOracle::new(Box::new(default_http_source()));
            let beacon_value = oracle.get_beacon_value(beacon_kind).await?;
            let epoch_key = stegochannel::epoch::derive_epoch_key(&key, beacon_kind.id(), &beacon_value);

            let mut input = String::new();
            std::io::Read::read_to_string(&mut std::io::stdin(), &mut input)?;
            let bits: Vec<u8> = input.trim().bytes().map(|b| (b == b'1') as u8).collect();

            match decode_frame(&bits, &epoch_key, seq) {
                Ok(decoded) => {
                    println!("valid = true");
                    println!("version = {}", decoded.version);
                    println!("encrypted = {}", decoded.encrypted);
                    println!("payload = {}", String::from_utf8_lossy(&decoded.payload));
                }
                Err(reason) => {
                    println!("valid = false");
                    println!("reason = {reason}");
                }
            }
        }
    }

    Ok(())
}

fn default_http_source() -> HttpBeaconSource {
    EngineConfig::default().build_http_beacon_source(reqwest::Client::new())
}

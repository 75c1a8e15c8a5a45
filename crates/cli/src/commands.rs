use std::time::Duration;

use anyhow::{Context, bail};
use colored::Colorize;
use rcard_apdu_core::Command;
use rcard_client::{CardManager, RunConfig};
use rcard_transport_vsmartcard::{VirtualCard, VirtualCardConfig};
use tracing::info;

use crate::utils::{HexBytes, format_response};

/// Connect the manager, failing when no card was found
pub fn connect_command(manager: &mut CardManager, config: &RunConfig) -> anyhow::Result<()> {
    let connected = manager
        .connect(config)
        .with_context(|| format!("Failed to connect to {} card", config.card_type))?;
    if !connected {
        bail!("No card found for card type {}", config.card_type);
    }

    if let Some(response) = manager.select_response() {
        println!("SELECT: {}", format_response(response));
    }
    Ok(())
}

/// List PC/SC readers
#[cfg(feature = "pcsc")]
pub fn list_readers_command() -> anyhow::Result<()> {
    let manager = rcard_transport_pcsc::PcscDeviceManager::new()?;
    let readers = match manager.list_readers() {
        Ok(readers) => readers,
        Err(rcard_transport_pcsc::PcscError::NoReadersAvailable) => Vec::new(),
        Err(e) => return Err(e.into()),
    };

    if readers.is_empty() {
        println!("No readers found!");
        return Ok(());
    }

    println!("Available readers:");
    for (i, reader) in readers.iter().enumerate() {
        let status = if reader.has_card() {
            "card present".green()
        } else {
            "no card".yellow()
        };
        println!("{}. {} ({})", i, reader.name(), status);
    }

    Ok(())
}

/// List PC/SC readers
#[cfg(not(feature = "pcsc"))]
pub fn list_readers_command() -> anyhow::Result<()> {
    bail!("Reader listing needs rcard built with the `pcsc` feature")
}

/// Print ATR and protocol
pub fn atr_command(manager: &mut CardManager) -> anyhow::Result<()> {
    let atr = manager.atr().context("Failed to read the ATR")?;
    println!("ATR: {}", atr.to_string().as_str().cyan());

    match manager.protocol()? {
        Some(protocol) => println!("Protocol: {protocol}"),
        None => println!("Protocol: unknown"),
    }
    Ok(())
}

/// Send APDUs and print the responses
pub fn send_command(manager: &mut CardManager, apdus: &[HexBytes], repeat: u32) -> anyhow::Result<()> {
    let commands = apdus
        .iter()
        .map(|apdu| {
            Command::from_bytes(apdu.as_slice()).with_context(|| format!("Invalid APDU {apdu}"))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    for round in 0..repeat {
        if repeat > 1 {
            println!("{}", format!("Round {}", round + 1).as_str().bold());
        }
        for command in &commands {
            println!(">> {command}");
            let response = manager.transmit(command)?;
            let elapsed = manager
                .last_transmit_duration()
                .unwrap_or_default()
                .as_millis();
            println!("<< {} [{elapsed} ms]", format_response(&response));
        }
    }
    Ok(())
}

/// Serve the connected card to a VPCD until it disconnects
pub fn vicc_command(
    manager: &mut CardManager,
    host: &str,
    port: u16,
    reversed: bool,
    timeout: Option<Duration>,
) -> anyhow::Result<()> {
    let channel = manager
        .take_channel()
        .context("The card manager has no channel to serve")?;

    let config = if reversed {
        VirtualCardConfig::listener(port)
    } else {
        VirtualCardConfig::connector(host, port)
    }
    .with_connect_timeout(timeout);

    info!(host, port, reversed, "Starting virtual card");
    let mut card = VirtualCard::new(channel, config);
    card.run().context("Virtual card session failed")?;
    info!(served = card.served(), "Terminating");
    Ok(())
}

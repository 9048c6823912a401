//! RFCOMM AT command loop for the HFP/HSP audio gateway role
//!
//! Handles the service-level-connection handshake (feature exchange,
//! indicator reporting, codec negotiation) and the gain/accessory
//! commands. Call-state indicators are reported as a fixed snapshot.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{EngineError, Result};
use crate::hfp::at::{self, AtCommand, AtKind};
use crate::transport::{ReleaseGuard, ScoCodec, Transport, TransportState};

/// AG feature: enhanced call status
const AG_FEAT_ECS: u32 = 1 << 6;
/// AG feature: codec negotiation
const AG_FEAT_CODEC: u32 = 1 << 9;
/// HF feature: codec negotiation
const HF_FEAT_CODEC: u32 = 1 << 7;

/// Fixed indicator snapshot: no call, no call setup, service present,
/// full signal, no roaming, full battery, no held calls
const CIND_STATUS: &str = "+CIND: 0,0,1,4,0,4,0";
const CIND_SCHEMA: &str = "+CIND: (\"call\",(0,1)),(\"callsetup\",(0-3)),(\"service\",(0-1)),\
                           (\"signal\",(0-5)),(\"roam\",(0,1)),(\"battchg\",(0-5)),\
                           (\"callheld\",(0-2))";

async fn write_response<S>(bt: &mut S, message: &str) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    bt.write_all(format!("\r\n{message}\r\n").as_bytes()).await
}

fn parse_xapl(value: &str) -> Option<(u16, u16, u32, u32)> {
    // <vendor>-<product>-<version>,<features>, vendor and product in hex
    let (ids, features) = value.split_once(',')?;
    let mut parts = ids.split('-');
    let vendor = u16::from_str_radix(parts.next()?, 16).ok()?;
    let product = u16::from_str_radix(parts.next()?, 16).ok()?;
    let version = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((vendor, product, version, features.trim().parse().ok()?))
}

/// Run the RFCOMM worker for an audio-gateway transport.
///
/// # Errors
///
/// [`EngineError::ProfileMismatch`] when the transport is not an RFCOMM
/// one or has no paired SCO transport; peer disconnection is a clean
/// exit after the transport state is set to aborted.
pub async fn run<S>(transport: Arc<Transport>, mut bt: S) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let _guard = ReleaseGuard(&transport);
    let rfcomm = transport.rfcomm_data()?;
    let sco_transport = rfcomm.sco().ok_or(EngineError::ProfileMismatch {
        expected: "paired SCO transport",
    })?;
    let sco = sco_transport.sco_data()?;

    // narrowband until the HF negotiates otherwise
    sco.set_codec(ScoCodec::Cvsd);
    let mut mic_gain = sco.mic_gain();
    let mut spk_gain = sco.spk_gain();

    let mut buffer = [0u8; 64];

    tracing::debug!("Starting RFCOMM loop: {:?}", transport.profile());
    loop {
        let len = tokio::select! {
            biased;
            () = transport.event() => {
                // relay gain changes made through the control plane
                if mic_gain != sco.mic_gain() {
                    mic_gain = sco.mic_gain();
                    tracing::debug!("Setting microphone gain: {mic_gain}");
                    write_response(&mut bt, &format!("+VGM={mic_gain}")).await?;
                }
                if spk_gain != sco.spk_gain() {
                    spk_gain = sco.spk_gain();
                    tracing::debug!("Setting speaker gain: {spk_gain}");
                    write_response(&mut bt, &format!("+VGS={spk_gain}")).await?;
                }
                continue;
            }
            res = bt.read(&mut buffer) => {
                match res {
                    Ok(0) => {
                        tracing::debug!("RFCOMM disconnected");
                        transport.set_state(TransportState::Aborted);
                        return Ok(());
                    }
                    Ok(len) => len,
                    Err(e) if matches!(
                        e.kind(),
                        std::io::ErrorKind::ConnectionAborted
                            | std::io::ErrorKind::ConnectionReset
                            | std::io::ErrorKind::NotConnected
                            | std::io::ErrorKind::TimedOut
                    ) => {
                        tracing::debug!("RFCOMM disconnected: {e}");
                        transport.set_state(TransportState::Aborted);
                        return Ok(());
                    }
                    Err(e) => {
                        tracing::error!("RFCOMM read error: {e}");
                        continue;
                    }
                }
            }
        };

        let line = String::from_utf8_lossy(&buffer[..len]).into_owned();
        tracing::debug!("AT: {}", line.trim_end());

        let command = match at::parse(&line) {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!("Invalid AT command ({e}): {}", line.trim_end());
                continue;
            }
        };

        let mut response = "OK".to_string();
        match (&command.name[..], command.kind) {
            ("RING", _) => {}
            ("+CKPD", AtKind::Set) if command.value == "200" => {}

            ("+VGM", AtKind::Set) => {
                mic_gain = command.value.parse().unwrap_or(0);
                sco.set_mic_gain(mic_gain);
            }
            ("+VGS", AtKind::Set) => {
                spk_gain = command.value.parse().unwrap_or(0);
                sco.set_spk_gain(spk_gain);
            }

            ("+IPHONEACCEV", AtKind::Set) => {
                handle_accessory_event(rfcomm, &command);
            }
            ("+XAPL", AtKind::Set) => match parse_xapl(&command.value) {
                Some((vendor, product, version, features)) => {
                    rfcomm.update_accessory(|info| {
                        info.vendor_id = vendor;
                        info.product_id = product;
                        info.version = version;
                        info.features = features;
                    });
                    response = "+XAPL=BlueALSA,0".to_string();
                }
                None => {
                    tracing::warn!("Invalid XAPL value: {}", command.value);
                    response = "ERROR".to_string();
                }
            },

            ("+BRSF", AtKind::Set) => {
                let hf_features: u32 = command.value.parse().unwrap_or(0);
                tracing::debug!("Got HF features: 0x{hf_features:X}");

                let mut ag_features = AG_FEAT_ECS;
                if hf_features & HF_FEAT_CODEC != 0 {
                    ag_features |= AG_FEAT_CODEC;
                } else {
                    // no codec negotiation, hence no wideband audio;
                    // AT+BAC will not be sent
                    sco.set_codec(ScoCodec::Cvsd);
                }
                sco.set_hf_features(hf_features);

                write_response(&mut bt, &format!("+BRSF: {ag_features}")).await?;
            }
            ("+BAC", AtKind::Set) => {
                tracing::debug!("Supported codecs: {}", command.value);
                for codec in command.value.split(',') {
                    if codec.trim().parse() == Ok(ScoCodec::Msbc as u8) {
                        sco.set_codec(ScoCodec::Msbc);
                    }
                }
            }

            ("+CIND", AtKind::Get) => {
                write_response(&mut bt, CIND_STATUS).await?;
            }
            ("+CIND", AtKind::Test) => {
                write_response(&mut bt, CIND_SCHEMA).await?;
            }
            ("+CMER", AtKind::Set) => {
                // the last step of the service-level-connection setup
                write_response(&mut bt, &response).await?;
                let codec = sco.codec();
                if codec != ScoCodec::Cvsd {
                    write_response(&mut bt, &format!("+BCS: {}", codec as u8)).await?;
                }
                continue;
            }
            ("+BCS", AtKind::Set) => {
                tracing::debug!("Got codec selected: {}", command.value);
            }

            ("+BTRH", AtKind::Get)
            | ("+NREC", AtKind::Set)
            | ("+CCWA", AtKind::Set)
            | ("+BIA", AtKind::Set) => {}

            ("+CHLD", AtKind::Test) => {
                write_response(&mut bt, "+CHLD: (0,1,2,3)").await?;
            }

            _ => {
                tracing::warn!("Unsupported AT command: {}", command.name);
                response = "ERROR".to_string();
            }
        }

        write_response(&mut bt, &response).await?;
    }
}

fn handle_accessory_event(rfcomm: &crate::transport::Rfcomm, command: &AtCommand) {
    // <count>,<key>,<value>,...
    let mut parts = command.value.split(',');
    let count: usize = parts.next().and_then(|c| c.parse().ok()).unwrap_or(0);

    for _ in 0..count {
        let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
            break;
        };
        match key.trim() {
            "1" => rfcomm.update_accessory(|info| {
                info.battery = value.trim().parse().unwrap_or(0);
            }),
            "2" => rfcomm.update_accessory(|info| {
                info.docked = value.trim().parse().unwrap_or(0);
            }),
            other => tracing::warn!("Unsupported IPHONEACCEV key: {other}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xapl_values_parse() {
        let (vendor, product, version, features) = parse_xapl("05AC-1234-100,10").unwrap();
        assert_eq!(vendor, 0x05AC);
        assert_eq!(product, 0x1234);
        assert_eq!(version, 100);
        assert_eq!(features, 10);

        assert!(parse_xapl("garbage").is_none());
        assert!(parse_xapl("05AC-1234,10").is_none());
    }
}

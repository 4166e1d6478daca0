//! BLE GATT provisioning service (BlueZ)
//!
//! Advertises one primary service under the device hostname with four
//! characteristics: scan trigger (write), network list (read), connect
//! (write) and status (read). Payloads are UTF-8 JSON; reads answer from the
//! provisioner's cache so they stay within BLE timing. This transport exists
//! to get the device onto a network; it stays advertised afterwards for
//! reconfiguration but never carries terminal or telemetry traffic.

use bluer::adv::Advertisement;
use bluer::gatt::local::{
    Application, Characteristic, CharacteristicRead, CharacteristicWrite,
    CharacteristicWriteMethod, ReqError, Service,
};
use bluer::Uuid;
use std::sync::Arc;
use sysinfo::System;
use tracing::{info, warn};

use crate::wifi::Provisioner;

pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x12345678_1234_5678_1234_567890abcde0);
pub const SCAN_UUID: Uuid = Uuid::from_u128(0x12345678_1234_5678_1234_567890abcde1);
pub const LIST_UUID: Uuid = Uuid::from_u128(0x12345678_1234_5678_1234_567890abcde2);
pub const CONNECT_UUID: Uuid = Uuid::from_u128(0x12345678_1234_5678_1234_567890abcde3);
pub const STATUS_UUID: Uuid = Uuid::from_u128(0x12345678_1234_5678_1234_567890abcde4);

/// Advertise and serve the provisioning service until the process exits
pub async fn run(provisioner: Arc<Provisioner>) -> bluer::Result<()> {
    let session = bluer::Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;

    let local_name = System::host_name().unwrap_or_else(|| "blackbox".to_string());

    let advertisement = Advertisement {
        service_uuids: vec![SERVICE_UUID].into_iter().collect(),
        discoverable: Some(true),
        local_name: Some(local_name.clone()),
        ..Default::default()
    };
    let _adv_handle = adapter.advertise(advertisement).await?;

    let application = Application {
        services: vec![Service {
            uuid: SERVICE_UUID,
            primary: true,
            characteristics: vec![
                scan_characteristic(Arc::clone(&provisioner)),
                list_characteristic(Arc::clone(&provisioner)),
                connect_characteristic(Arc::clone(&provisioner)),
                status_characteristic(provisioner),
            ],
            ..Default::default()
        }],
        ..Default::default()
    };
    let _app_handle = adapter.serve_gatt_application(application).await?;

    info!(
        "BLE provisioning service advertising as {} on {}",
        local_name,
        adapter.name()
    );

    // The handles must stay alive for BlueZ to keep serving
    std::future::pending::<()>().await;
    Ok(())
}

/// Plain trigger write: any value starts a scan
fn scan_characteristic(provisioner: Arc<Provisioner>) -> Characteristic {
    Characteristic {
        uuid: SCAN_UUID,
        write: Some(CharacteristicWrite {
            write: true,
            method: CharacteristicWriteMethod::Fun(Box::new(move |_value, _req| {
                let provisioner = Arc::clone(&provisioner);
                Box::pin(async move {
                    provisioner.trigger_scan().await;
                    Ok(())
                })
            })),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Cached network list as a JSON array
fn list_characteristic(provisioner: Arc<Provisioner>) -> Characteristic {
    Characteristic {
        uuid: LIST_UUID,
        read: Some(CharacteristicRead {
            read: true,
            fun: Box::new(move |req| {
                let provisioner = Arc::clone(&provisioner);
                Box::pin(async move {
                    let networks = provisioner.list_networks().await;
                    let data = serde_json::to_vec(&networks).map_err(|_| ReqError::Failed)?;
                    Ok(offset_slice(data, req.offset))
                })
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// JSON `{ssid, password?}` write starting a join attempt
fn connect_characteristic(provisioner: Arc<Provisioner>) -> Characteristic {
    Characteristic {
        uuid: CONNECT_UUID,
        write: Some(CharacteristicWrite {
            write: true,
            method: CharacteristicWriteMethod::Fun(Box::new(move |value, _req| {
                let provisioner = Arc::clone(&provisioner);
                Box::pin(async move {
                    match serde_json::from_slice(&value) {
                        Ok(request) => {
                            provisioner.connect(request).await;
                            Ok(())
                        }
                        Err(e) => {
                            warn!("Malformed connect payload: {}", e);
                            Err(ReqError::Failed)
                        }
                    }
                })
            })),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Last known join outcome as JSON `{connected, ip, error}`
fn status_characteristic(provisioner: Arc<Provisioner>) -> Characteristic {
    Characteristic {
        uuid: STATUS_UUID,
        read: Some(CharacteristicRead {
            read: true,
            fun: Box::new(move |req| {
                let provisioner = Arc::clone(&provisioner);
                Box::pin(async move {
                    let status = provisioner.status().await;
                    let data = serde_json::to_vec(&status).map_err(|_| ReqError::Failed)?;
                    Ok(offset_slice(data, req.offset))
                })
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// BlueZ long reads re-request with an offset into the same value
fn offset_slice(data: Vec<u8>, offset: u16) -> Vec<u8> {
    data.get(offset as usize..).unwrap_or_default().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_characteristic_uuids_are_distinct() {
        let uuids = [SERVICE_UUID, SCAN_UUID, LIST_UUID, CONNECT_UUID, STATUS_UUID];
        for (i, a) in uuids.iter().enumerate() {
            for b in &uuids[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_offset_slice() {
        let data = b"0123456789".to_vec();
        assert_eq!(offset_slice(data.clone(), 0), b"0123456789".to_vec());
        assert_eq!(offset_slice(data.clone(), 4), b"456789".to_vec());
        assert_eq!(offset_slice(data, 12), Vec::<u8>::new());
    }
}

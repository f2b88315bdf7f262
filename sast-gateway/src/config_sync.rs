//! Periodic cloud config pull.
//!
//! Grounded on `original_source/SAST_observer.py::_getSetting4GApps` /
//! `_sendACK2GAS`: pull `?sens=sensor`, parse the leading date element,
//! apply via `Store::apply_config`, then ACK the outcome regardless of
//! whether it updated, was a no-op, or errored.

use crate::cloud::{CloudClient, ConfigFetchOutcome};
use sast_core::model::ApplyOutcome;
use sast_core::store::Store;
use tracing::{error, info, warn};

pub fn run_cycle(store: &mut Store, cloud: &CloudClient) {
    info!("config_sync cycle starting");
    let message = match cloud.fetch_config() {
        ConfigFetchOutcome::TransportError => {
            warn!("config fetch transport error, skipping this cycle");
            return;
        }
        ConfigFetchOutcome::NonOk(status) => {
            warn!(status, "config fetch non-200, acking with default message");
            String::new()
        }
        ConfigFetchOutcome::InvalidDate(mess) => {
            error!(message = %mess, "config date invalid, aborting apply");
            mess
        }
        ConfigFetchOutcome::Ok(response) => {
            let outcome = store.apply_config(&response.rows, response.date);
            match &outcome {
                Ok(ApplyOutcome::Updated) => {
                    info!("config apply: updated");
                    "Update done.".to_string()
                }
                Ok(ApplyOutcome::Unchanged) => {
                    info!("config apply: unchanged");
                    "No update required.".to_string()
                }
                Ok(ApplyOutcome::Error) => {
                    error!("config apply: error");
                    "Update Error.".to_string()
                }
                Err(e) => {
                    error!(error = %e, "apply_config failed");
                    "Update Error.".to_string()
                }
            }
        }
    };

    if let Err(e) = cloud.ack_config(&message) {
        error!(error = %e, "config ack failed after retries");
    }
}

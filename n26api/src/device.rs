use uuid::Uuid;

use crate::{Error, ENV_DEVICE_ID};

/// Picks the device ID: the configured one, then the environment, then a new one
///
/// The nil UUID counts as "not configured".
pub(crate) fn resolve_device_id(
    configured: Option<Uuid>,
    from_env: Option<String>,
) -> Result<Uuid, Error> {
    if let Some(device_id) = configured.filter(|id| !id.is_nil()) {
        return Ok(device_id);
    }

    if let Some(value) = from_env.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        tracing::trace!(var = ENV_DEVICE_ID, "using device id from environment");
        return value.parse().map_err(Error::InvalidDeviceId);
    }

    let device_id = Uuid::new_v4();
    tracing::debug!(%device_id, "generated new device id");
    Ok(device_id)
}

use tracing::{error, info, warn};

use crate::broadcast::BroadcastResetHelper;
use crate::obs::EncoderControl;

/// Bring the encoder's stream up.
///
/// When `reset` is given, the channel's active broadcast is cycled first.
/// That step is best-effort: a failed reset is logged and the start goes
/// ahead anyway.  Returns true when the encoder was already streaming or
/// acknowledged the start command.
pub async fn start_stream(
    encoder: &dyn EncoderControl,
    reset: Option<(&BroadcastResetHelper, &str)>,
) -> bool {
    if let Some((helper, channel_id)) = reset {
        match helper.find_active_broadcast(channel_id).await {
            Some(broadcast) => {
                if helper.reset(&broadcast).await {
                    info!("Broadcast reset completed.");
                } else {
                    warn!("Broadcast reset failed; starting the stream anyway.");
                }
            }
            None => warn!("No broadcast to reset; starting the stream anyway."),
        }
    }

    match encoder.get_streaming().await {
        Ok(true) => {
            info!("OBS is already streaming.");
            true
        }
        Ok(false) => match encoder.start_stream().await {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to start OBS stream: {}", e);
                false
            }
        },
        Err(e) => {
            error!("Failed to query OBS stream status: {}", e);
            false
        }
    }
}

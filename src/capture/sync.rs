//! Timestamp alignment of the two camera streams

use std::time::Duration;

use tracing::{debug, warn};

use super::sink::{pull, CameraSample, CameraSink, Eye, Pulled};

/// Outcome of aligning one left/right sample pair
pub enum SyncOutcome<S> {
    Synced { left: S, right: S, discarded: u32 },
    /// Catch-up cap exceeded; publish the left sample for both eyes
    Degraded { left: S },
    /// A re-pull returned nothing without end-of-stream
    Retry,
    SourceLost(Eye),
}

/// Align `left` and `right` to within one frame duration.
///
/// Only the stream that is ahead in time keeps its sample; the lagging
/// stream's excess samples are drained by re-pulling from its sink. At most
/// `max_catchup` samples are discarded before giving up on this pair.
pub fn synchronize<L, R>(
    left_sink: &mut L,
    right_sink: &mut R,
    mut left: L::Sample,
    mut right: R::Sample,
    frame_duration: Duration,
    max_catchup: u32,
) -> SyncOutcome<L::Sample>
where
    L: CameraSink,
    R: CameraSink<Sample = L::Sample>,
{
    let mut discarded = 0u32;

    loop {
        let (Some(pts_l), Some(pts_r)) = (left.pts(), right.pts()) else {
            return SyncOutcome::Synced {
                left,
                right,
                discarded,
            };
        };

        let lagging = if pts_l > pts_r + frame_duration {
            Eye::Right
        } else if pts_r > pts_l + frame_duration {
            Eye::Left
        } else {
            if discarded > 0 {
                debug!(
                    "Streams aligned after {} discards: L {:?} R {:?}",
                    discarded, pts_l, pts_r
                );
            }
            return SyncOutcome::Synced {
                left,
                right,
                discarded,
            };
        };

        if discarded >= max_catchup {
            warn!(
                "Camera drift not corrected after {} discards (L {:?} R {:?}), showing left eye only",
                discarded, pts_l, pts_r
            );
            return SyncOutcome::Degraded { left };
        }

        let pulled = match lagging {
            Eye::Right => pull(right_sink),
            Eye::Left => pull(left_sink),
        };

        match pulled {
            Pulled::Sample(sample) => {
                match lagging {
                    Eye::Right => right = sample,
                    Eye::Left => left = sample,
                }
                discarded += 1;
                metrics::counter!("camera_resync_discards").increment(1);
            }
            Pulled::Transient => return SyncOutcome::Retry,
            Pulled::SourceLost => return SyncOutcome::SourceLost(lagging),
        }
    }
}

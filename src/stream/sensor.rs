//! Decoded sensor stream for one measurement type

use futures::Stream;
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::sync::Weak;
use std::task::{Context, Poll};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, warn};

use crate::pmd::{PMD_DATA, PmdClient, PmdDataEvent, StreamDecoder};
use crate::types::{PmdMeasurementType, StreamFrame};
use crate::{BleError, Result};

pin_project! {
    /// Frames of one online measurement.
    ///
    /// Yields `Err` for frames that fail to decode and keeps going; unsupported
    /// layouts are skipped with a warning. Ends after reporting a disconnect or
    /// a failure of the data characteristic.
    /// Dropping the stream stops the measurement on the device.
    pub struct SensorStream {
        #[pin]
        frames: BroadcastStream<PmdDataEvent>,
        decoder: StreamDecoder,
        stop: StopOnDrop,
        finished: bool,
    }
}

impl SensorStream {
    pub(crate) fn new(
        client: Weak<PmdClient>,
        decoder: StreamDecoder,
        frames: broadcast::Receiver<PmdDataEvent>,
    ) -> Self {
        let measurement_type = decoder.measurement_type();
        Self {
            frames: BroadcastStream::new(frames),
            decoder,
            stop: StopOnDrop { client: Some(client), measurement_type },
            finished: false,
        }
    }

    pub fn measurement_type(&self) -> PmdMeasurementType {
        self.decoder.measurement_type()
    }

    /// Stop the measurement and wait for the device to confirm.
    pub async fn stop(mut self) -> Result<()> {
        match self.stop.disarm() {
            Some(client) => client.stop_streaming(self.decoder.measurement_type()).await,
            None => Ok(()),
        }
    }
}

impl Stream for SensorStream {
    type Item = Result<StreamFrame>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        if *this.finished {
            return Poll::Ready(None);
        }

        loop {
            let event = match this.frames.as_mut().poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(None) => {
                    *this.finished = true;
                    return Poll::Ready(None);
                }
                Poll::Ready(Some(event)) => event,
            };

            match event {
                Ok(PmdDataEvent::Frame(data)) => {
                    let own_type = data.first().map(|b| PmdMeasurementType::from_byte(*b));
                    if own_type != Some(this.decoder.measurement_type()) {
                        continue;
                    }
                    match this.decoder.decode(&data) {
                        Ok(frame) => return Poll::Ready(Some(Ok(frame))),
                        Err(BleError::UnsupportedFrameType { measurement_type, frame_type, compressed }) => {
                            warn!(?measurement_type, frame_type, compressed, "Unsupported frame type skipped");
                        }
                        Err(e) => return Poll::Ready(Some(Err(e))),
                    }
                }
                Ok(PmdDataEvent::Failed { status, is_notifying }) => {
                    *this.finished = true;
                    let error = if is_notifying {
                        BleError::transport_failed(format!("ATT status {} on PMD data", status))
                    } else {
                        BleError::NotifyNotEnabled { uuid: PMD_DATA }
                    };
                    return Poll::Ready(Some(Err(error)));
                }
                Ok(PmdDataEvent::Disconnected) => {
                    *this.finished = true;
                    let address = this.stop.disarm().map(|c| c.address().to_string()).unwrap_or_default();
                    return Poll::Ready(Some(Err(BleError::disconnected(address))));
                }
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(
                        measurement_type = ?this.decoder.measurement_type(),
                        skipped,
                        "Stream consumer lagging, frames dropped"
                    );
                }
            }
        }
    }
}

/// Sends a stop command when the stream goes away without [`SensorStream::stop`].
struct StopOnDrop {
    client: Option<Weak<PmdClient>>,
    measurement_type: PmdMeasurementType,
}

impl StopOnDrop {
    fn disarm(&mut self) -> Option<std::sync::Arc<PmdClient>> {
        self.client.take().and_then(|c| c.upgrade())
    }
}

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        let Some(client) = self.disarm() else { return };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!(measurement_type = ?self.measurement_type, "No runtime, stream not stopped on device");
            return;
        };
        let measurement_type = self.measurement_type;
        runtime.spawn(async move {
            if let Err(e) = client.stop_streaming(measurement_type).await {
                debug!(?measurement_type, error = %e, "Stop on drop failed");
            }
        });
    }
}

// ── Gateway client adapters ──
//
// Wires roverlink-net's interface-pinned `GatewayClient` into the
// engine's seams: it is both the media source for the stream relay and
// the command sink for the control translator.

use async_trait::async_trait;
use futures::StreamExt;

use roverlink_net::GatewayClient;

use crate::control::CommandSink;
use crate::error::CoreError;
use crate::model::ControlCommand;
use crate::relay::{MediaFeed, MediaSource};

#[async_trait]
impl MediaSource for GatewayClient {
    async fn open(&self) -> Result<MediaFeed, CoreError> {
        let media = self.open_media().await?;
        Ok(MediaFeed {
            content_type: media.content_type,
            bytes: media.bytes.map(|chunk| chunk.map_err(CoreError::from)).boxed(),
        })
    }
}

#[async_trait]
impl CommandSink for GatewayClient {
    async fn send(&self, command: &ControlCommand) -> Result<(), CoreError> {
        Ok(self.send_control(&command.to_query()).await?)
    }
}

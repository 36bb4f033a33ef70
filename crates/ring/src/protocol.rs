//! Ring wire messages and framing.
//!
//! Frames are a u32 big-endian length prefix followed by the json
//! encoding of a [RingMessage]. Json keeps the control plane debuggable
//! on the wire; membership traffic is low-volume so encoding efficiency
//! is not a concern here.

use gridmesh_api::*;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Envelope fields common to every ring message.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RingHeader {
    /// Unique message id, also used for de-duplication when a message
    /// circles back around the ring.
    pub id: VersionedId,

    /// The node that created this message.
    pub sender: NodeId,

    /// The coordinator that verified (stamped) this message, if any.
    /// Topology changes are only applied from verified messages.
    pub verifier: Option<NodeId>,

    /// The topology version this message produces when applied. Zero
    /// for messages that are not verified topology changes.
    pub topology_version: u64,
}

/// The payload of a ring message.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RingBody {
    /// A prospective member asks to join. Routed ring-wise to the
    /// coordinator, which assigns the join order and answers with a
    /// verified [RingBody::NodeAdded].
    JoinRequest {
        /// The joining node, order not yet assigned.
        node: NodeInfo,
    },

    /// Coordinator-stamped admission of a new member. Carries the full
    /// membership after the change, so receivers can adopt it as a
    /// snapshot even when intermediate changes were missed.
    NodeAdded {
        /// The admitted node, join order assigned.
        node: NodeInfo,

        /// Full membership after the change, join order ascending.
        ring: Vec<NodeInfo>,
    },

    /// Coordinator confirmation that an admission completed a full
    /// circle. On receiving this the joining node is connected.
    TopologyBroadcast {
        /// The confirmed topology version.
        version: u64,

        /// Full membership at that version, join order ascending.
        ring: Vec<NodeInfo>,
    },

    /// A member is leaving gracefully. Circulates unverified to the
    /// coordinator, which stamps it into a topology change.
    Leave {
        /// The leaving member.
        node: NodeId,
    },

    /// A member is considered failed by the sender. Circulates
    /// unverified to the coordinator, which stamps it into a topology
    /// change.
    Fail {
        /// The failed member.
        node: NodeId,
    },

    /// Periodic liveness circulation. Not a topology change.
    Heartbeat,

    /// Direct liveness probe, answered inline with [RingBody::Pong]
    /// without entering ring circulation.
    Ping,

    /// Answer to [RingBody::Ping].
    Pong,
}

/// One ring protocol message.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RingMessage {
    /// The envelope.
    pub header: RingHeader,

    /// The payload.
    pub body: RingBody,
}

/// Write one length-prefixed frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    w: &mut W,
    msg: &RingMessage,
    max_frame_bytes: usize,
) -> MeshResult<()> {
    let buf = serde_json::to_vec(msg)
        .map_err(|e| MeshError::other_src("encode ring message", e))?;
    if buf.len() > max_frame_bytes {
        return Err(MeshError::other(format!(
            "refusing to write oversize ring frame: {} bytes",
            buf.len(),
        )));
    }
    w.write_all(&(buf.len() as u32).to_be_bytes())
        .await
        .map_err(|e| MeshError::other_src("write frame length", e))?;
    w.write_all(&buf)
        .await
        .map_err(|e| MeshError::other_src("write frame body", e))?;
    w.flush()
        .await
        .map_err(|e| MeshError::other_src("flush frame", e))?;
    Ok(())
}

/// Read one length-prefixed frame.
pub async fn read_frame<R: AsyncRead + Unpin>(
    r: &mut R,
    max_frame_bytes: usize,
) -> MeshResult<RingMessage> {
    let mut len = [0_u8; 4];
    r.read_exact(&mut len)
        .await
        .map_err(|e| MeshError::other_src("read frame length", e))?;
    let len = u32::from_be_bytes(len) as usize;
    if len > max_frame_bytes {
        return Err(MeshError::other(format!(
            "refusing to read oversize ring frame: {len} bytes"
        )));
    }
    let mut buf = vec![0; len];
    r.read_exact(&mut buf)
        .await
        .map_err(|e| MeshError::other_src("read frame body", e))?;
    serde_json::from_slice(&buf)
        .map_err(|e| MeshError::other_src("decode ring message", e))
}

#[cfg(test)]
mod test {
    use super::*;

    fn message() -> RingMessage {
        RingMessage {
            header: RingHeader {
                id: VersionedId {
                    counter: 3,
                    node: NodeId::new(),
                },
                sender: NodeId::new(),
                verifier: None,
                topology_version: 0,
            },
            body: RingBody::JoinRequest {
                node: NodeInfo::new(NodeId::new())
                    .with_addr(([127, 0, 0, 1], 4400).into()),
            },
        }
    }

    #[tokio::test]
    async fn frame_roundtrip() {
        let msg = message();

        let mut buf = Vec::new();
        write_frame(&mut buf, &msg, 1024 * 1024).await.unwrap();

        let mut read = std::io::Cursor::new(buf);
        let out = read_frame(&mut read, 1024 * 1024).await.unwrap();
        assert_eq!(msg, out);
    }

    #[tokio::test]
    async fn oversize_frames_rejected() {
        let msg = message();

        assert!(write_frame(&mut Vec::new(), &msg, 8).await.is_err());

        // an oversize length prefix is rejected before any allocation
        let mut read =
            std::io::Cursor::new(u32::MAX.to_be_bytes().to_vec());
        assert!(read_frame(&mut read, 1024).await.is_err());
    }

    #[tokio::test]
    async fn short_frame_fails() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &message(), 1024 * 1024)
            .await
            .unwrap();
        buf.truncate(buf.len() - 1);

        let mut read = std::io::Cursor::new(buf);
        assert!(read_frame(&mut read, 1024 * 1024).await.is_err());
    }
}

//! Framing: 1 discriminant byte + bincode body of the variant.

use bincode::Options;

use crate::protocol::{Chat, HelloPeer, Message};

/// Discriminant 0 is reserved for "no message".
pub const TAG_PEER_HELLO: u8 = 1;
pub const TAG_CHAT: u8 = 2;

const TAG_SIZE: usize = 1;
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Encode a message into a single frame: discriminant byte + bincode payload.
pub fn encode_frame(msg: &Message) -> Result<Vec<u8>, FrameEncodeError> {
    let (tag, payload) = match msg {
        Message::PeerHello(hello) => (TAG_PEER_HELLO, bincode::serialize(hello)?),
        Message::Chat(chat) => (TAG_CHAT, bincode::serialize(chat)?),
    };
    if TAG_SIZE + payload.len() > MAX_FRAME_LEN {
        return Err(FrameEncodeError::TooLarge);
    }
    let mut out = Vec::with_capacity(TAG_SIZE + payload.len());
    out.push(tag);
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Error encoding a message into a frame (bincode or size limit).
#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("encode error: {0}")]
    Encode(#[from] bincode::Error),
    #[error("frame too large")]
    TooLarge,
}

/// Decode one complete frame. The transport delivers whole frames, so the body must
/// consume every byte after the discriminant.
pub fn decode_frame(bytes: &[u8]) -> Result<Message, FrameDecodeError> {
    let (&tag, body) = bytes.split_first().ok_or(FrameDecodeError::Empty)?;
    if bytes.len() > MAX_FRAME_LEN {
        return Err(FrameDecodeError::TooLarge);
    }
    match tag {
        TAG_PEER_HELLO => decode_body::<HelloPeer>(body).map(Message::PeerHello),
        TAG_CHAT => decode_body::<Chat>(body).map(Message::Chat),
        other => Err(FrameDecodeError::UnknownDiscriminant(other)),
    }
}

/// Same layout as `bincode::serialize`, but claimed lengths are checked against the
/// frame limit before anything is allocated, and leftover bytes are an error.
fn decode_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, FrameDecodeError> {
    let value = bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_limit(MAX_FRAME_LEN as u64)
        .reject_trailing_bytes()
        .deserialize(body)?;
    Ok(value)
}

/// Error decoding a frame. Every variant means "drop the frame".
#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("empty frame")]
    Empty,
    #[error("frame too large")]
    TooLarge,
    #[error("unknown message discriminant {0}")]
    UnknownDiscriminant(u8),
    #[error("decode error: {0}")]
    Decode(#[from] bincode::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::PeerId;

    #[test]
    fn hello_frame_carries_tag_and_peers() {
        let msg = Message::hello(vec![PeerId(3), PeerId(9)], true);
        let frame = encode_frame(&msg).unwrap();
        assert_eq!(frame[0], TAG_PEER_HELLO);
        assert_eq!(decode_frame(&frame).unwrap(), msg);
    }

    #[test]
    fn chat_frame_keeps_text() {
        let msg = Message::chat("héllo swarm");
        let frame = encode_frame(&msg).unwrap();
        assert_eq!(frame[0], TAG_CHAT);
        match decode_frame(&frame).unwrap() {
            Message::Chat(chat) => assert_eq!(chat.text, "héllo swarm"),
            other => panic!("expected Chat, got {:?}", other),
        }
    }

    #[test]
    fn empty_frame_rejected() {
        assert!(matches!(decode_frame(&[]), Err(FrameDecodeError::Empty)));
    }

    #[test]
    fn unknown_discriminant_rejected() {
        let mut frame = encode_frame(&Message::chat("x")).unwrap();
        frame[0] = 0;
        assert!(matches!(
            decode_frame(&frame),
            Err(FrameDecodeError::UnknownDiscriminant(0))
        ));
        frame[0] = 77;
        assert!(matches!(
            decode_frame(&frame),
            Err(FrameDecodeError::UnknownDiscriminant(77))
        ));
    }

    #[test]
    fn truncated_body_is_malformed() {
        let frame = encode_frame(&Message::hello(vec![PeerId(1), PeerId(2)], false)).unwrap();
        assert!(matches!(
            decode_frame(&frame[..frame.len() - 3]),
            Err(FrameDecodeError::Decode(_))
        ));
    }

    #[test]
    fn trailing_garbage_is_malformed() {
        let mut frame = encode_frame(&Message::chat("hi")).unwrap();
        frame.extend_from_slice(&[0xde, 0xad]);
        assert!(matches!(
            decode_frame(&frame),
            Err(FrameDecodeError::Decode(_))
        ));
    }

    #[test]
    fn huge_claimed_length_is_malformed() {
        // 9 bytes claiming a 1 TiB chat string
        let mut frame = vec![TAG_CHAT];
        frame.extend_from_slice(&(1u64 << 40).to_le_bytes());
        assert!(matches!(
            decode_frame(&frame),
            Err(FrameDecodeError::Decode(_))
        ));

        let mut frame = vec![TAG_PEER_HELLO];
        frame.extend_from_slice(&u64::MAX.to_le_bytes());
        assert!(matches!(
            decode_frame(&frame),
            Err(FrameDecodeError::Decode(_))
        ));
    }

    #[test]
    fn oversized_chat_refused() {
        let msg = Message::chat("a".repeat(MAX_FRAME_LEN));
        assert!(matches!(encode_frame(&msg), Err(FrameEncodeError::TooLarge)));
    }
}

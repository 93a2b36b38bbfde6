#![forbid(unsafe_code)]

use bytes::{BufMut, BytesMut};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Default maximum frame payload size for v1.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 256 * 1024; // 256 KiB

#[derive(Debug, Error)]
pub enum FramingError {
	#[error("frame exceeds maximum size: len={len} max={max}")]
	FrameTooLarge {
		len: usize,
		max: usize,
	},

	#[error("insufficient data: need={need} have={have}")]
	InsufficientData {
		need: usize,
		have: usize,
	},

	#[error("payload decode error: {0}")]
	Decode(#[source] serde_json::Error),

	#[error("payload encode error: {0}")]
	Encode(#[source] serde_json::Error),
}

/// Encode a message into a length-prefixed JSON frame.
pub fn encode_frame<M: Serialize>(msg: &M, max_frame_size: usize) -> Result<Vec<u8>, FramingError> {
	let payload = serde_json::to_vec(msg).map_err(FramingError::Encode)?;
	if payload.len() > max_frame_size {
		return Err(FramingError::FrameTooLarge {
			len: payload.len(),
			max: max_frame_size,
		});
	}

	let mut out = Vec::with_capacity(4 + payload.len());
	out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
	out.extend_from_slice(&payload);
	Ok(out)
}

/// Encode a frame using `DEFAULT_MAX_FRAME_SIZE`.
pub fn encode_frame_default<M: Serialize>(msg: &M) -> Result<Vec<u8>, FramingError> {
	encode_frame(msg, DEFAULT_MAX_FRAME_SIZE)
}

/// Append an encoded frame into the provided buffer.
pub fn encode_frame_into<M: Serialize>(buf: &mut BytesMut, msg: &M, max_frame_size: usize) -> Result<(), FramingError> {
	let payload = serde_json::to_vec(msg).map_err(FramingError::Encode)?;
	if payload.len() > max_frame_size {
		return Err(FramingError::FrameTooLarge {
			len: payload.len(),
			max: max_frame_size,
		});
	}

	buf.reserve(4 + payload.len());
	buf.put_u32(payload.len() as u32);
	buf.extend_from_slice(&payload);
	Ok(())
}

/// Compute total frame length (prefix + payload).
#[inline]
pub fn frame_len_from_payload_len(payload_len: usize) -> usize {
	4 + payload_len
}

/// Decode a single frame from the start of `src`.
pub fn decode_frame<M: DeserializeOwned>(src: &[u8], max_frame_size: usize) -> Result<(M, usize), FramingError> {
	if src.len() < 4 {
		return Err(FramingError::InsufficientData {
			need: 4,
			have: src.len(),
		});
	}

	let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
	if len > max_frame_size {
		return Err(FramingError::FrameTooLarge {
			len,
			max: max_frame_size,
		});
	}

	let need = 4 + len;
	if src.len() < need {
		return Err(FramingError::InsufficientData { need, have: src.len() });
	}

	let msg = serde_json::from_slice(&src[4..4 + len]).map_err(FramingError::Decode)?;
	Ok((msg, need))
}

/// Try to decode a single frame from a growable buffer.
pub fn try_decode_frame_from_buffer<M: DeserializeOwned>(
	buf: &mut BytesMut,
	max_frame_size: usize,
) -> Result<Option<M>, FramingError> {
	if buf.len() < 4 {
		return Ok(None);
	}

	let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
	if len > max_frame_size {
		return Err(FramingError::FrameTooLarge {
			len,
			max: max_frame_size,
		});
	}

	let need = 4 + len;
	if buf.len() < need {
		return Ok(None);
	}

	let msg = serde_json::from_slice(&buf[4..need]).map_err(FramingError::Decode)?;
	let _ = buf.split_to(need);
	Ok(Some(msg))
}

//! 加密与压缩钩子在读写两侧之间的共享状态

use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;

use crate::error::CloseReason;
use crate::state::{Compression, ConnectionState, Encryption};

pub(crate) const ENCRYPTION_NOT_INITIALISED: &str = "Tried sending data with encryption not initialised.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EncryptionMode {
    /// 等待对端握手
    Pending,
    Active,
    Disabled,
}

pub(crate) struct EncryptionSlot {
    pub(crate) mode: EncryptionMode,
    pub(crate) cipher: Box<dyn Encryption>,
}

/// 锁只在 CPU 处理期间持有，不跨越 I/O
#[derive(Clone, Default)]
pub(crate) struct Transforms {
    pub(crate) encryption: Option<Arc<Mutex<EncryptionSlot>>>,
    pub(crate) compression: Option<Arc<Mutex<Box<dyn Compression>>>>,
}

impl Transforms {
    pub(crate) fn from_state<S: ConnectionState>(state: &mut S) -> Self {
        Self {
            encryption: state.encryption().map(|cipher| {
                Arc::new(Mutex::new(EncryptionSlot {
                    mode: EncryptionMode::Pending,
                    cipher,
                }))
            }),
            compression: state.compression().map(|c| Arc::new(Mutex::new(c))),
        }
    }

    pub(crate) fn is_passthrough(&self) -> bool {
        self.encryption.is_none() && self.compression.is_none()
    }

    /// 出站：先压缩后加密，结果追加到 `dst`
    pub(crate) fn encode_outbound(
        &self,
        src: &[u8],
        scratch: &mut BytesMut,
        dst: &mut BytesMut,
    ) -> Result<(), CloseReason> {
        let mut plain = src;
        if let Some(compression) = &self.compression {
            compression
                .lock()
                .compress(src, scratch)
                .map_err(|e| CloseReason::Io(format!("compression failed: {}", e)))?;
            plain = &scratch[..];
        }

        match &self.encryption {
            Some(slot) => {
                let mut slot = slot.lock();
                match slot.mode {
                    EncryptionMode::Pending => {
                        return Err(CloseReason::Protocol(ENCRYPTION_NOT_INITIALISED.to_string()))
                    }
                    EncryptionMode::Active => slot.cipher.encrypt(plain, dst),
                    EncryptionMode::Disabled => dst.extend_from_slice(plain),
                }
            }
            None => dst.extend_from_slice(plain),
        }
        Ok(())
    }
}

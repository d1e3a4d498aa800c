
use crate::core::constants::BLOCK_SIZE;
use std::sync::Mutex;

/// Recycles BLOCK_SIZE scratch buffers so block-by-block fork copies don't
/// allocate per block.
pub struct BufferPool {
    buffers: Mutex<Vec<Vec<u8>>>,
    max_size: usize,
}

impl BufferPool {
    pub fn new(max_size: usize) -> Self {
        Self {
            buffers: Mutex::new(Vec::new()),
            max_size,
        }
    }

    pub fn get(&self) -> Vec<u8> {
        if let Ok(mut buffers) = self.buffers.lock() {
            buffers.pop().unwrap_or_else(|| vec![0u8; BLOCK_SIZE])
        } else {
            vec![0u8; BLOCK_SIZE]
        }
    }

    pub fn put(&self, mut buf: Vec<u8>) {
        if buf.len() != BLOCK_SIZE {
            return;
        }

        if let Ok(mut buffers) = self.buffers.lock() {
            if buffers.len() < self.max_size {
                buf.fill(0);
                buffers.push(buf);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.buffers.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

static BLOCK_BUFFER_POOL: once_cell::sync::Lazy<BufferPool> =
    once_cell::sync::Lazy::new(|| BufferPool::new(64));

pub fn get_block_buffer() -> Vec<u8> {
    BLOCK_BUFFER_POOL.get()
}

pub fn put_block_buffer(buf: Vec<u8>) {
    BLOCK_BUFFER_POOL.put(buf);
}

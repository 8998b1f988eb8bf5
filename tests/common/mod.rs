//! Common test functions.
#![allow(dead_code)]

use std::{
    io::{self, IoSlice, IoSliceMut, Read, Seek, SeekFrom, Write},
    sync::{Arc, Mutex, Once},
};

use usb_msc_test::{page_size, Config, Context, MemTarget, Target};

/// Buffer size large enough for the 128 sector tests.
pub const SIZE: usize = 65536;

pub fn init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
        println!("page size {}", page_size());
    });
}

/// Captured progress and result output.
#[derive(Clone, Default)]
pub struct Output(Arc<Mutex<Vec<u8>>>);

impl Output {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for Output {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub fn config(size: usize, count: u32) -> Config {
    let mut config = Config::new("mem");
    config.size = size;
    config.count = count;
    config
}

pub fn context(target: impl Target + 'static, config: &Config) -> (Context, Output) {
    init();
    let output = Output::default();
    let ctx = Context::new(target, config).expect("cannot create context").with_output(output.clone());
    (ctx, output)
}

/// Memory target that reports less capacity than it has, so that it accepts
/// accesses past its reported end.
#[derive(Debug)]
pub struct Oversized {
    pub inner: MemTarget,
    pub reported: u64,
}

impl Oversized {
    pub fn new(reported: usize, extra: usize) -> Self {
        Self { inner: MemTarget::new(reported + extra, 512), reported: reported as u64 }
    }
}

impl Read for Oversized {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }

    fn read_vectored(&mut self, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize> {
        self.inner.read_vectored(bufs)
    }
}

impl Write for Oversized {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        self.inner.write_vectored(bufs)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl Seek for Oversized {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

impl Target for Oversized {
    fn capacity(&self) -> io::Result<u64> {
        Ok(self.reported)
    }

    fn block_size(&self) -> io::Result<u32> {
        self.inner.block_size()
    }

    fn sync(&mut self) -> io::Result<()> {
        self.inner.sync()
    }
}

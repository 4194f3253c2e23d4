use flate2::FlushDecompress;
use std::cell::{RefCell, RefMut};
use std::io;

#[derive(Debug, Default)]
pub struct Gzip {
    state: thread_local::CachedThreadLocal<RefCell<flate2::Decompress>>,
}

impl Gzip {
    fn decompressor(&self) -> RefMut<flate2::Decompress> {
        let state = self.state.get_or(|| RefCell::new(flate2::Decompress::new(true)));
        let mut decompressor = state.borrow_mut();
        decompressor.reset(true);
        decompressor
    }
}

impl super::Decompress for Gzip {
    fn decompress(&self, src: &[u8], dst: &mut [u8]) -> io::Result<usize> {
        let mut decompressor = self.decompressor();
        loop {
            let in_offset = min_mem(decompressor.total_in(), src.len());
            let input = &src[in_offset..];

            let out_offset = min_mem(decompressor.total_out(), dst.len());
            let output = &mut dst[out_offset..];

            let status = decompressor.decompress(input, output, FlushDecompress::Finish)?;
            match status {
                flate2::Status::Ok => continue,
                flate2::Status::BufError => return Err(io::ErrorKind::UnexpectedEof.into()),
                flate2::Status::StreamEnd => break,
            }
        }
        Ok(decompressor.total_out() as usize)
    }
}

fn min_mem(file_size: u64, mem_size: usize) -> usize {
    if file_size < mem_size as u64 {
        file_size as usize
    } else {
        mem_size
    }
}

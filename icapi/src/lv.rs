//! Reading LabVIEW handles filled in by the interface library.
//!
//! All readers accept null handles and treat them as empty. A negative element
//! count is treated as empty as well.

use std::ptr;
use std::slice;

use crate::icapi_sys::{DoubleArray, FloatArray, LStrHandle, LStrHandleArray, Library};

fn count(dim_size: i32) -> usize {
    if dim_size < 0 {
        0
    } else {
        dim_size as usize
    }
}

/// # Safety
///
/// `handle` must be null or a valid handle as allocated by the LabVIEW memory manager.
pub unsafe fn read_floats(handle: FloatArray) -> Vec<f32> {
    if handle.is_null() || (*handle).is_null() {
        return Vec::new();
    }
    let base = *handle;
    let n = count((*base).dim_size);
    let data = ptr::addr_of!((*base).numeric) as *const f32;
    slice::from_raw_parts(data, n).to_vec()
}

/// # Safety
///
/// See [`read_floats`].
pub unsafe fn read_doubles(handle: DoubleArray) -> Vec<f64> {
    if handle.is_null() || (*handle).is_null() {
        return Vec::new();
    }
    let base = *handle;
    let n = count((*base).dim_size);
    let data = ptr::addr_of!((*base).numeric) as *const f64;
    slice::from_raw_parts(data, n).to_vec()
}

/// # Safety
///
/// See [`read_floats`].
pub unsafe fn read_string(handle: LStrHandle) -> Vec<u8> {
    if handle.is_null() || (*handle).is_null() {
        return Vec::new();
    }
    let base = *handle;
    let n = count((*base).cnt);
    let data = ptr::addr_of!((*base).bytes) as *const u8;
    slice::from_raw_parts(data, n).to_vec()
}

/// # Safety
///
/// See [`read_floats`]. This also applies to every string handle in the array.
pub unsafe fn read_strings(handle: LStrHandleArray) -> Vec<Vec<u8>> {
    if handle.is_null() || (*handle).is_null() {
        return Vec::new();
    }
    let base = *handle;
    let n = count((*base).dim_size);
    let data = ptr::addr_of!((*base).string) as *const LStrHandle;
    slice::from_raw_parts(data, n)
        .iter()
        .map(|x| read_string(*x))
        .collect()
}

impl Library {
    pub(crate) fn alloc_floats(&self, n: i32) -> anyhow::Result<FloatArray> {
        let ret = unsafe { self.api.AllocateFloatArray(n) };
        if ret.is_null() {
            anyhow::bail!("AllocateFloatArray({}) failed", n);
        }
        Ok(ret)
    }

    pub(crate) fn alloc_doubles(&self, n: i32) -> anyhow::Result<DoubleArray> {
        let ret = unsafe { self.api.AllocateDoubleArray(n) };
        if ret.is_null() {
            anyhow::bail!("AllocateDoubleArray({}) failed", n);
        }
        Ok(ret)
    }

    pub(crate) fn alloc_strings(&self, n: i32) -> anyhow::Result<LStrHandleArray> {
        let ret = unsafe { self.api.AllocateLStrHandleArray(n) };
        if ret.is_null() {
            anyhow::bail!("AllocateLStrHandleArray({}) failed", n);
        }
        Ok(ret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::icapi_sys::{FloatArrayBase, LStr, LStrHandleArrayBase};

    // Builds a handle in an i64-aligned buffer: the length prefix, padding to the
    // element alignment, then the elements.
    struct Block {
        _buf: Vec<i64>,
        ptr: *mut i64,
    }

    impl Block {
        fn new(dim_size: i32, payload: &[u8], offset: usize) -> Self {
            let mut bytes = vec![0_u8; offset + payload.len()];
            bytes[..4].copy_from_slice(&dim_size.to_ne_bytes());
            bytes[offset..].copy_from_slice(payload);
            let mut buf = vec![0_i64; (bytes.len() + 7) / 8 + 1];
            unsafe {
                ptr::copy_nonoverlapping(bytes.as_ptr(), buf.as_mut_ptr() as *mut u8, bytes.len());
            }
            let ptr = buf.as_mut_ptr();
            Self { _buf: buf, ptr }
        }

        fn handle<T>(&mut self) -> *mut *mut T {
            &mut self.ptr as *mut *mut i64 as *mut *mut T
        }
    }

    #[test]
    fn floats() {
        let values = [1.5_f32, -2.0, 1e6];
        let payload: Vec<u8> = values.iter().flat_map(|x| x.to_ne_bytes().to_vec()).collect();
        let mut block = Block::new(3, &payload, 4);
        let ret = unsafe { read_floats(block.handle::<FloatArrayBase>()) };
        assert_eq!(ret, values.to_vec());
    }

    #[test]
    fn doubles_are_aligned() {
        let payload: Vec<u8> = [0.25_f64, 9210.5]
            .iter()
            .flat_map(|x| x.to_ne_bytes().to_vec())
            .collect();
        let mut block = Block::new(2, &payload, std::mem::align_of::<f64>().max(4));
        let ret = unsafe { read_doubles(block.handle()) };
        assert_eq!(ret, vec![0.25, 9210.5]);
    }

    #[test]
    fn strings() {
        let mut a = Block::new(4, b"H3O+", 4);
        let mut b = Block::new(2, &[0xB0, b'C'], 4);
        let handles = [a.handle::<LStr>(), b.handle::<LStr>()];
        let payload: Vec<u8> = handles
            .iter()
            .flat_map(|x| (*x as usize).to_ne_bytes().to_vec())
            .collect();
        let offset = std::mem::align_of::<usize>().max(4);
        let mut arr = Block::new(2, &payload, offset);
        let ret = unsafe { read_strings(arr.handle::<LStrHandleArrayBase>()) };
        assert_eq!(ret, vec![b"H3O+".to_vec(), vec![0xB0, b'C']]);
    }

    #[test]
    fn null_and_negative() {
        unsafe {
            assert!(read_floats(ptr::null_mut()).is_empty());
            assert!(read_string(ptr::null_mut()).is_empty());
        }
        let mut block = Block::new(-5, &[], 4);
        assert!(unsafe { read_floats(block.handle()) }.is_empty());
    }
}

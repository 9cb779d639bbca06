//! RTL2832U dongles through librtlsdr.
//!
//! The library is loaded at runtime so the binary still works (with `--simulate`) on machines
//! that don't have it installed. Samples come off the dongle as interleaved unsigned 8-bit I/Q,
//! centered on 127.5.

use std::{
    ffi::{c_char, c_int, c_uint, c_void, CStr},
    ptr,
    sync::Arc,
};

use libloading::Library;
use tracing::{debug, info};

use crate::{
    capture::CancelToken,
    device::{DeviceResult, SdrDevice, SdrDriver},
    error::DeviceError,
    Iq,
};

type DevHandle = *mut c_void;

#[cfg(target_os = "linux")]
const LIB_NAMES: &[&str] = &["librtlsdr.so.0", "librtlsdr.so"];
#[cfg(target_os = "macos")]
const LIB_NAMES: &[&str] = &["librtlsdr.dylib", "librtlsdr.0.dylib"];
#[cfg(target_os = "windows")]
const LIB_NAMES: &[&str] = &["rtlsdr.dll", "librtlsdr.dll"];
#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
const LIB_NAMES: &[&str] = &["librtlsdr.so"];

// Bytes per synchronous read, must be a multiple of 512
const READ_CHUNK: usize = 256 * 1024;

// Consecutive `read_sync` calls that may come back empty before we call the dongle stuck
const MAX_EMPTY_READS: usize = 16;

/// Function table pulled out of librtlsdr. The pointers stay valid as long as `_lib` lives.
struct RtlSdrLib {
    get_device_count: unsafe extern "C" fn() -> c_uint,
    get_device_name: unsafe extern "C" fn(c_uint) -> *const c_char,
    open: unsafe extern "C" fn(*mut DevHandle, c_uint) -> c_int,
    close: unsafe extern "C" fn(DevHandle) -> c_int,
    set_center_freq: unsafe extern "C" fn(DevHandle, c_uint) -> c_int,
    set_sample_rate: unsafe extern "C" fn(DevHandle, c_uint) -> c_int,
    set_tuner_gain_mode: unsafe extern "C" fn(DevHandle, c_int) -> c_int,
    set_tuner_gain: unsafe extern "C" fn(DevHandle, c_int) -> c_int,
    reset_buffer: unsafe extern "C" fn(DevHandle) -> c_int,
    read_sync: unsafe extern "C" fn(DevHandle, *mut c_void, c_int, *mut c_int) -> c_int,
    _lib: Library,
}

/// Copy a function pointer out of the library
unsafe fn symbol<T: Copy>(lib: &Library, name: &[u8]) -> Option<T> {
    lib.get::<T>(name).ok().map(|sym| *sym)
}

impl RtlSdrLib {
    fn load() -> Option<Self> {
        LIB_NAMES.iter().find_map(|name| {
            // Safety: librtlsdr has no load-time initialisers we need to worry about
            let lib = unsafe { Library::new(name) }.ok()?;
            // Safety: the signatures match rtl-sdr.h
            let table = unsafe {
                RtlSdrLib {
                    get_device_count: symbol(&lib, b"rtlsdr_get_device_count\0")?,
                    get_device_name: symbol(&lib, b"rtlsdr_get_device_name\0")?,
                    open: symbol(&lib, b"rtlsdr_open\0")?,
                    close: symbol(&lib, b"rtlsdr_close\0")?,
                    set_center_freq: symbol(&lib, b"rtlsdr_set_center_freq\0")?,
                    set_sample_rate: symbol(&lib, b"rtlsdr_set_sample_rate\0")?,
                    set_tuner_gain_mode: symbol(&lib, b"rtlsdr_set_tuner_gain_mode\0")?,
                    set_tuner_gain: symbol(&lib, b"rtlsdr_set_tuner_gain\0")?,
                    reset_buffer: symbol(&lib, b"rtlsdr_reset_buffer\0")?,
                    read_sync: symbol(&lib, b"rtlsdr_read_sync\0")?,
                    _lib: lib,
                }
            };
            info!("Loaded RTL-SDR library: {}", name);
            Some(table)
        })
    }
}

/// Keep a run length of empty reads, failing once it reaches [`MAX_EMPTY_READS`]
fn note_read(empty_reads: &mut usize, n_read: c_int) -> DeviceResult<()> {
    if n_read > 0 {
        *empty_reads = 0;
        return Ok(());
    }
    *empty_reads += 1;
    if *empty_reads >= MAX_EMPTY_READS {
        return Err(DeviceError::ReadFailed(format!(
            "no data after {MAX_EMPTY_READS} consecutive reads"
        )));
    }
    Ok(())
}

/// Convert one unsigned 8-bit I/Q pair to a normalized complex sample
pub fn convert_u8(i: u8, q: u8) -> Iq {
    Iq::new((i as f32 - 127.5) / 127.5, (q as f32 - 127.5) / 127.5)
}

pub struct RtlSdrDriver {
    lib: Arc<RtlSdrLib>,
    cancel: CancelToken,
}

impl RtlSdrDriver {
    /// Load librtlsdr. Reads from devices opened through this driver give up with
    /// [`DeviceError::Interrupted`] once `cancel` fires.
    pub fn load(cancel: CancelToken) -> DeviceResult<Self> {
        let lib = RtlSdrLib::load().ok_or(DeviceError::LibraryNotFound)?;
        Ok(Self {
            lib: Arc::new(lib),
            cancel,
        })
    }

    pub fn device_count(&self) -> u32 {
        // Safety: no arguments, no preconditions
        unsafe { (self.lib.get_device_count)() }
    }
}

impl SdrDriver for RtlSdrDriver {
    type Device = RtlSdrDevice;

    fn open(&mut self, device_index: u32) -> DeviceResult<RtlSdrDevice> {
        let count = self.device_count();
        if device_index >= count {
            return Err(DeviceError::DeviceNotFound(format!(
                "index {device_index}, {count} device(s) attached"
            )));
        }
        // Safety: index checked above, librtlsdr returns a static string
        let name = unsafe {
            let raw = (self.lib.get_device_name)(device_index);
            if raw.is_null() {
                "RTL-SDR".to_owned()
            } else {
                CStr::from_ptr(raw).to_string_lossy().into_owned()
            }
        };
        let mut handle: DevHandle = ptr::null_mut();
        // Safety: handle is a valid out pointer
        let rc = unsafe { (self.lib.open)(&mut handle, device_index) };
        if rc < 0 || handle.is_null() {
            return Err(DeviceError::OpenFailed(rc));
        }
        debug!("Opened {} (index {})", name, device_index);
        Ok(RtlSdrDevice {
            lib: self.lib.clone(),
            handle,
            name,
            sample_rate: 0,
            center_frequency: 0.0,
            gain: 0.0,
            cancel: self.cancel.clone(),
        })
    }
}

pub struct RtlSdrDevice {
    lib: Arc<RtlSdrLib>,
    handle: DevHandle,
    name: String,
    sample_rate: u32,
    center_frequency: f64,
    gain: f64,
    cancel: CancelToken,
}

impl RtlSdrDevice {
    fn check(&self, what: &'static str, rc: c_int) -> DeviceResult<()> {
        if rc < 0 {
            Err(DeviceError::Configuration { what, code: rc })
        } else {
            Ok(())
        }
    }
}

impl SdrDevice for RtlSdrDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_sample_rate(&mut self, hz: u32) -> DeviceResult<()> {
        // Safety: handle is open until close()
        let rc = unsafe { (self.lib.set_sample_rate)(self.handle, hz) };
        self.check("sample rate", rc)?;
        self.sample_rate = hz;
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn set_center_frequency(&mut self, hz: f64) -> DeviceResult<()> {
        if !(0.0..=u32::MAX as f64).contains(&hz) {
            return Err(DeviceError::Configuration {
                what: "center frequency",
                code: -1,
            });
        }
        // Safety: handle is open until close()
        let rc = unsafe { (self.lib.set_center_freq)(self.handle, hz.round() as c_uint) };
        self.check("center frequency", rc)?;
        self.center_frequency = hz;
        Ok(())
    }

    fn center_frequency(&self) -> f64 {
        self.center_frequency
    }

    fn set_gain(&mut self, db: f64) -> DeviceResult<()> {
        // Manual gain, librtlsdr takes tenths of a dB
        // Safety: handle is open until close()
        let rc = unsafe { (self.lib.set_tuner_gain_mode)(self.handle, 1) };
        self.check("gain mode", rc)?;
        let rc = unsafe { (self.lib.set_tuner_gain)(self.handle, (db * 10.0).round() as c_int) };
        self.check("gain", rc)?;
        self.gain = db;
        Ok(())
    }

    fn gain(&self) -> f64 {
        self.gain
    }

    fn read_samples(&mut self, n: usize) -> DeviceResult<Vec<Iq>> {
        // Safety: handle is open until close()
        let rc = unsafe { (self.lib.reset_buffer)(self.handle) };
        if rc < 0 {
            return Err(DeviceError::ReadFailed(format!("buffer reset failed ({rc})")));
        }
        let mut samples = Vec::with_capacity(n);
        let mut bytes = vec![0u8; READ_CHUNK];
        let mut empty_reads = 0;
        while samples.len() < n {
            if self.cancel.is_cancelled() {
                return Err(DeviceError::Interrupted);
            }
            let mut n_read: c_int = 0;
            // Safety: `bytes` is READ_CHUNK long and outlives the call
            let rc = unsafe {
                (self.lib.read_sync)(
                    self.handle,
                    bytes.as_mut_ptr() as *mut c_void,
                    READ_CHUNK as c_int,
                    &mut n_read,
                )
            };
            if rc < 0 {
                return Err(DeviceError::ReadFailed(format!("read_sync returned {rc}")));
            }
            note_read(&mut empty_reads, n_read)?;
            let wanted = 2 * (n - samples.len());
            let got = (n_read.max(0) as usize).min(wanted);
            samples.extend(bytes[..got].chunks_exact(2).map(|iq| convert_u8(iq[0], iq[1])));
        }
        Ok(samples)
    }

    fn close(&mut self) -> DeviceResult<()> {
        if self.handle.is_null() {
            return Ok(());
        }
        // Safety: handle is open, and nulled right after so it can't be closed twice
        let rc = unsafe { (self.lib.close)(self.handle) };
        self.handle = ptr::null_mut();
        if rc < 0 {
            return Err(DeviceError::Configuration {
                what: "close",
                code: rc,
            });
        }
        Ok(())
    }
}

impl Drop for RtlSdrDevice {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u8_conversion() {
        assert_eq!(convert_u8(0, 255), Iq::new(-1.0, 1.0));
        let mid = convert_u8(127, 128);
        assert!((mid.re + 0.5 / 127.5).abs() < 1e-6);
        assert!((mid.im - 0.5 / 127.5).abs() < 1e-6);
    }

    #[test]
    fn test_stalled_reads_give_up() {
        let mut empty = 0;
        for _ in 0..MAX_EMPTY_READS - 1 {
            note_read(&mut empty, 0).unwrap();
        }
        // Data resets the run
        note_read(&mut empty, 512).unwrap();
        assert_eq!(empty, 0);
        for _ in 0..MAX_EMPTY_READS - 1 {
            note_read(&mut empty, 0).unwrap();
        }
        assert!(matches!(
            note_read(&mut empty, 0),
            Err(DeviceError::ReadFailed(_))
        ));
    }
}

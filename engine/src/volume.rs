// Raw volume access
// Overlapped, unbuffered reads against \\.\X: plus the NTFS file-record
// control and the elevation check gating the MFT route

use findex_core::FindexError;
use std::os::windows::ffi::OsStrExt;
use std::ptr::null_mut;
use winapi::shared::minwindef::{DWORD, FALSE, TRUE};
use winapi::shared::winerror::ERROR_IO_PENDING;
use winapi::um::errhandlingapi::GetLastError;
use winapi::um::fileapi::{CreateFileW, GetDiskFreeSpaceExW, ReadFile, OPEN_EXISTING};
use winapi::um::handleapi::{CloseHandle, INVALID_HANDLE_VALUE};
use winapi::um::ioapiset::{DeviceIoControl, GetOverlappedResult};
use winapi::um::minwinbase::OVERLAPPED;
use winapi::um::processthreadsapi::{GetCurrentProcess, OpenProcessToken};
use winapi::um::securitybaseapi::GetTokenInformation;
use winapi::um::synchapi::CreateEventW;
use winapi::um::winbase::{FILE_FLAG_NO_BUFFERING, FILE_FLAG_OVERLAPPED, FILE_FLAG_RANDOM_ACCESS};
use winapi::um::winnt::{
    TokenElevation, FILE_SHARE_READ, FILE_SHARE_WRITE, GENERIC_READ, HANDLE, TOKEN_ELEVATION,
    TOKEN_QUERY, ULARGE_INTEGER,
};

/// FSCTL_GET_NTFS_FILE_RECORD: FILE_DEVICE_FILE_SYSTEM, function 26,
/// METHOD_BUFFERED, FILE_ANY_ACCESS.
const FSCTL_GET_NTFS_FILE_RECORD: DWORD = 0x0009_0068;

/// NTFS_FILE_RECORD_OUTPUT_BUFFER: reference number (8) + length (4)
/// precede the record bytes.
pub const FILE_RECORD_OUTPUT_HEADER: usize = 12;

#[repr(C)]
struct NtfsFileRecordInput {
    file_reference_number: i64,
}

/// Handle to a raw volume. Reads are positional, so a single handle is
/// shared by all extent-reading workers.
pub struct Volume {
    handle: HANDLE,
}

unsafe impl Send for Volume {}
unsafe impl Sync for Volume {}

impl Volume {
    /// Plain open, enough for the boot sector.
    pub fn open(letter: char) -> Result<Self, FindexError> {
        Self::open_with_flags(letter, 0)
    }

    /// Open for parallel direct I/O. FILE_FLAG_NO_BUFFERING requires
    /// sector-aligned buffers and offsets; the walker's buffer pool
    /// guarantees that.
    pub fn open_direct(letter: char) -> Result<Self, FindexError> {
        Self::open_with_flags(
            letter,
            FILE_FLAG_RANDOM_ACCESS | FILE_FLAG_NO_BUFFERING | FILE_FLAG_OVERLAPPED,
        )
    }

    fn open_with_flags(letter: char, flags: DWORD) -> Result<Self, FindexError> {
        let path = wide_string(&format!("\\\\.\\{}:", letter.to_ascii_uppercase()));
        let handle = unsafe {
            CreateFileW(
                path.as_ptr(),
                GENERIC_READ,
                FILE_SHARE_READ | FILE_SHARE_WRITE,
                null_mut(),
                OPEN_EXISTING,
                flags,
                null_mut(),
            )
        };
        if handle == INVALID_HANDLE_VALUE {
            return Err(FindexError::RawVolumeUnavailable(format!(
                "CreateFileW(\\\\.\\{}:) failed with error {}",
                letter,
                unsafe { GetLastError() }
            )));
        }
        Ok(Self { handle })
    }

    /// Read `buf.len()` bytes at an absolute volume offset.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<(), FindexError> {
        unsafe {
            let event = CreateEventW(null_mut(), FALSE, FALSE, null_mut());
            if event.is_null() {
                return Err(FindexError::Io(std::io::Error::last_os_error()));
            }
            let mut overlapped: OVERLAPPED = std::mem::zeroed();
            {
                let offsets = overlapped.u.s_mut();
                offsets.Offset = (offset & 0xFFFF_FFFF) as DWORD;
                offsets.OffsetHigh = (offset >> 32) as DWORD;
            }
            overlapped.hEvent = event;

            let mut transferred: DWORD = 0;
            let started = ReadFile(
                self.handle,
                buf.as_mut_ptr() as *mut _,
                buf.len() as DWORD,
                &mut transferred,
                &mut overlapped,
            );
            if started == FALSE && GetLastError() != ERROR_IO_PENDING {
                CloseHandle(event);
                return Err(FindexError::Io(std::io::Error::last_os_error()));
            }
            let finished = GetOverlappedResult(self.handle, &mut overlapped, &mut transferred, TRUE);
            CloseHandle(event);
            if finished == FALSE {
                return Err(FindexError::Io(std::io::Error::last_os_error()));
            }
        }
        Ok(())
    }

    /// Fetch one MFT record through the filesystem driver. `out` must hold
    /// `FILE_RECORD_OUTPUT_HEADER` plus the record size; returns the byte
    /// count the driver filled in.
    pub fn file_record(&self, record_number: u64, out: &mut [u8]) -> Result<usize, FindexError> {
        let input = NtfsFileRecordInput {
            file_reference_number: record_number as i64,
        };
        unsafe {
            let event = CreateEventW(null_mut(), FALSE, FALSE, null_mut());
            if event.is_null() {
                return Err(FindexError::Io(std::io::Error::last_os_error()));
            }
            let mut overlapped: OVERLAPPED = std::mem::zeroed();
            overlapped.hEvent = event;

            let mut returned: DWORD = 0;
            let started = DeviceIoControl(
                self.handle,
                FSCTL_GET_NTFS_FILE_RECORD,
                &input as *const _ as *mut _,
                std::mem::size_of::<NtfsFileRecordInput>() as DWORD,
                out.as_mut_ptr() as *mut _,
                out.len() as DWORD,
                &mut returned,
                &mut overlapped,
            );
            if started == FALSE && GetLastError() != ERROR_IO_PENDING {
                CloseHandle(event);
                return Err(FindexError::Io(std::io::Error::last_os_error()));
            }
            let finished = GetOverlappedResult(self.handle, &mut overlapped, &mut returned, TRUE);
            CloseHandle(event);
            if finished == FALSE {
                return Err(FindexError::Io(std::io::Error::last_os_error()));
            }
            Ok(returned as usize)
        }
    }
}

impl Drop for Volume {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.handle);
        }
    }
}

/// Whether the process token carries elevation. The raw volume cannot be
/// opened without it.
pub fn is_elevated() -> bool {
    unsafe {
        let mut token: HANDLE = null_mut();
        if OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token) == FALSE {
            return false;
        }
        let mut elevation: TOKEN_ELEVATION = std::mem::zeroed();
        let mut size = std::mem::size_of::<TOKEN_ELEVATION>() as DWORD;
        let ok = GetTokenInformation(
            token,
            TokenElevation,
            &mut elevation as *mut _ as *mut _,
            size,
            &mut size,
        );
        CloseHandle(token);
        ok != FALSE && elevation.TokenIsElevated != 0
    }
}

/// Used bytes on the volume, the progress denominator for the directory
/// walker (which sees sizes, not record counts).
pub fn used_bytes(letter: char) -> Option<u64> {
    let root = wide_string(&format!("{}:\\", letter.to_ascii_uppercase()));
    unsafe {
        let mut available: ULARGE_INTEGER = std::mem::zeroed();
        let mut total: ULARGE_INTEGER = std::mem::zeroed();
        let mut free: ULARGE_INTEGER = std::mem::zeroed();
        if GetDiskFreeSpaceExW(root.as_ptr(), &mut available, &mut total, &mut free) == FALSE {
            return None;
        }
        Some(*total.QuadPart() - *free.QuadPart())
    }
}

fn wide_string(s: &str) -> Vec<u16> {
    std::ffi::OsStr::new(s)
        .encode_wide()
        .chain(std::iter::once(0))
        .collect()
}

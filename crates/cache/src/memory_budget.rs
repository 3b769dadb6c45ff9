//! Memory budget sizing from the memory the machine has available.

const MB: u64 = 1024 * 1024;
const FALLBACK_AVAILABLE_RAM_BYTES: u64 = 2 * 1024 * MB;
const MIN_BITMAP_BUDGET_BYTES: u64 = 16 * MB;

/// Overrides detected available memory, in megabytes.
pub const AVAILABLE_RAM_ENV: &str = "PDF_VIEWER_AVAILABLE_RAM_MB";

/// Memory the system can hand out without swapping, in bytes, honoring
/// [`AVAILABLE_RAM_ENV`]. Falls back to physical memory when the platform
/// does not report availability.
pub fn available_memory_bytes() -> u64 {
    if let Ok(value) = std::env::var(AVAILABLE_RAM_ENV) {
        if let Ok(mb) = value.trim().parse::<u64>() {
            return mb.saturating_mul(MB);
        }
        log::warn!("ignoring unparsable {AVAILABLE_RAM_ENV}={value:?}");
    }

    system_available_ram_bytes()
        .or_else(system_total_ram_bytes)
        .unwrap_or(FALLBACK_AVAILABLE_RAM_BYTES)
}

/// Byte budget for the bitmap cache: `fraction` of available memory.
pub fn bitmap_budget_bytes(fraction: f64) -> usize {
    budget_from_available(available_memory_bytes(), fraction)
}

pub fn budget_from_available(available_bytes: u64, fraction: f64) -> usize {
    let fraction = if fraction.is_finite() { fraction.clamp(0.0, 1.0) } else { 0.0 };
    let proposed = (available_bytes as f64 * fraction) as u64;
    let floor = MIN_BITMAP_BUDGET_BYTES.min(available_bytes);
    usize::try_from(proposed.max(floor)).unwrap_or(usize::MAX)
}

/// `MemAvailable` from `/proc/meminfo`, in bytes.
fn parse_mem_available(meminfo: &str) -> Option<u64> {
    let line = meminfo.lines().find(|line| line.starts_with("MemAvailable:"))?;
    let mut fields = line["MemAvailable:".len()..].split_whitespace();
    let value: u64 = fields.next()?.parse().ok()?;
    match fields.next() {
        Some("kB") | None => Some(value.saturating_mul(1024)),
        Some(_) => None,
    }
}

#[cfg(target_os = "linux")]
fn system_available_ram_bytes() -> Option<u64> {
    if let Some(bytes) =
        std::fs::read_to_string("/proc/meminfo").ok().as_deref().and_then(parse_mem_available)
    {
        return Some(bytes);
    }

    // Kernels older than 3.14 lack MemAvailable.
    let info = sysinfo()?;
    let unit = info.mem_unit as u64;
    Some((info.freeram as u64 + info.bufferram as u64).saturating_mul(unit))
}

#[cfg(target_os = "linux")]
fn system_total_ram_bytes() -> Option<u64> {
    let info = sysinfo()?;
    Some((info.totalram as u64).saturating_mul(info.mem_unit as u64))
}

#[cfg(target_os = "linux")]
fn sysinfo() -> Option<libc::sysinfo> {
    let mut info = std::mem::MaybeUninit::<libc::sysinfo>::uninit();
    let rc = unsafe { libc::sysinfo(info.as_mut_ptr()) };
    if rc != 0 {
        return None;
    }
    Some(unsafe { info.assume_init() })
}

#[cfg(target_os = "macos")]
fn sysctl_value<T: Copy + Default>(name: &str) -> Option<T> {
    use std::ffi::CString;
    use std::mem::size_of;
    use std::ptr;

    let key = CString::new(name).ok()?;
    let mut value = T::default();
    let mut len = size_of::<T>();
    let result = unsafe {
        libc::sysctlbyname(
            key.as_ptr(),
            &mut value as *mut T as *mut libc::c_void,
            &mut len,
            ptr::null_mut(),
            0,
        )
    };
    if result == 0 && len == size_of::<T>() {
        Some(value)
    } else {
        None
    }
}

#[cfg(target_os = "macos")]
fn system_available_ram_bytes() -> Option<u64> {
    let free_pages = sysctl_value::<u32>("vm.page_free_count")?;
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if page_size <= 0 {
        return None;
    }
    Some((free_pages as u64).saturating_mul(page_size as u64))
}

#[cfg(target_os = "macos")]
fn system_total_ram_bytes() -> Option<u64> {
    sysctl_value::<u64>("hw.memsize")
}

#[cfg(not(any(target_os = "macos", target_os = "linux")))]
fn system_available_ram_bytes() -> Option<u64> {
    None
}

#[cfg(not(any(target_os = "macos", target_os = "linux")))]
fn system_total_ram_bytes() -> Option<u64> {
    None
}

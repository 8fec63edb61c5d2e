use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::time::Duration;

/// Open an AF_PACKET receive socket bound to `ifindex`.
///
/// `timeout` becomes `SO_RCVTIMEO`; a zero timeout blocks indefinitely.
pub fn open_socket_rx(ifindex: i32, timeout: Duration) -> Result<OwnedFd, String> {
    let protocol = (libc::ETH_P_ALL as u16).to_be();

    let raw = unsafe {
        libc::socket(
            libc::AF_PACKET,
            libc::SOCK_RAW | libc::SOCK_CLOEXEC,
            protocol as libc::c_int,
        )
    };
    if raw < 0 {
        return Err(format!("socket: {}", io::Error::last_os_error()));
    }
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };

    let mut sockaddr: libc::sockaddr_ll = unsafe { mem::zeroed() };
    sockaddr.sll_family = libc::AF_PACKET as u16;
    sockaddr.sll_protocol = protocol;
    sockaddr.sll_ifindex = ifindex;

    let ret = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            &sockaddr as *const libc::sockaddr_ll as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(format!("bind: {}", io::Error::last_os_error()));
    }

    let tv = libc::timeval {
        tv_sec: timeout.as_secs() as libc::time_t,
        tv_usec: timeout.subsec_micros() as libc::suseconds_t,
    };
    let ret = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_RCVTIMEO,
            &tv as *const libc::timeval as *const libc::c_void,
            mem::size_of::<libc::timeval>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(format!("setsockopt: {}", io::Error::last_os_error()));
    }

    Ok(fd)
}

/// Read one frame into `buffer`. `Ok(None)` when the receive timed out.
pub fn read_frame(fd: &OwnedFd, buffer: &mut [u8]) -> Result<Option<usize>, io::Error> {
    let packet_len = unsafe {
        libc::read(
            fd.as_raw_fd(),
            buffer.as_mut_ptr() as *mut libc::c_void,
            buffer.len(),
        )
    };

    if packet_len < 0 {
        let error_code = io::Error::last_os_error();
        return match error_code.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted => {
                Ok(None)
            }
            _ => Err(error_code),
        };
    }

    Ok(Some(packet_len as usize))
}

//! AF_PACKET socket implementation

use super::{Capture, RxInfo};
use crate::protocol::icmpv6::{Icmpv6Type, TYPE_OFFSET};
use crate::protocol::ipv6::{NextHeader, NEXT_HEADER_OFFSET};
use crate::{Error, Result};
use std::ffi::CString;
use std::os::unix::io::{AsRawFd, RawFd};
use tokio::io::unix::AsyncFd;

// Classic BPF opcodes
const BPF_LD: u16 = 0x00;
const BPF_B: u16 = 0x10;
const BPF_ABS: u16 = 0x20;
const BPF_JMP: u16 = 0x05;
const BPF_JEQ: u16 = 0x10;
const BPF_RET: u16 = 0x06;
const BPF_K: u16 = 0x00;

fn insn(code: u16, jt: u8, jf: u8, k: u32) -> libc::sock_filter {
    libc::sock_filter { code, jt, jf, k }
}

/// Accept ICMPv6 Router Advertisements, reject everything else.
fn ra_filter() -> Vec<libc::sock_filter> {
    vec![
        // Next header at offset 20
        insn(BPF_LD | BPF_B | BPF_ABS, 0, 0, NEXT_HEADER_OFFSET),
        insn(BPF_JMP | BPF_JEQ | BPF_K, 0, 3, NextHeader::Icmpv6 as u32),
        // ICMPv6 type at offset 54
        insn(BPF_LD | BPF_B | BPF_ABS, 0, 0, TYPE_OFFSET),
        insn(
            BPF_JMP | BPF_JEQ | BPF_K,
            0,
            1,
            Icmpv6Type::RouterAdvertisement as u32,
        ),
        insn(BPF_RET | BPF_K, 0, 0, 0xffff),
        insn(BPF_RET | BPF_K, 0, 0, 0),
    ]
}

/// AF_PACKET socket wrapper
pub struct AfPacketSocket {
    async_fd: AsyncFd<RawFd>,
    ifindex: i32,
}

impl AfPacketSocket {
    /// Create a socket on `ifname` that only sees IPv6 Router Advertisements
    pub fn bind_ra(ifname: &str) -> Result<Self> {
        let protocol = (libc::ETH_P_IPV6 as u16).to_be();
        let fd = unsafe { libc::socket(libc::AF_PACKET, libc::SOCK_RAW, protocol as i32) };

        if fd < 0 {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }

        // Filter before binding so no unfiltered frame gets queued
        if let Err(e) = Self::attach_filter(fd, &ra_filter()) {
            unsafe { libc::close(fd) };
            return Err(e);
        }

        let ifindex = match Self::get_ifindex(fd, ifname) {
            Ok(ifindex) => ifindex,
            Err(e) => {
                unsafe { libc::close(fd) };
                return Err(e);
            }
        };

        let sockaddr = libc::sockaddr_ll {
            sll_family: libc::AF_PACKET as u16,
            sll_protocol: protocol,
            sll_ifindex: ifindex,
            sll_hatype: 0,
            sll_pkttype: 0,
            sll_halen: 0,
            sll_addr: [0; 8],
        };

        let ret = unsafe {
            libc::bind(
                fd,
                &sockaddr as *const _ as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_ll>() as u32,
            )
        };

        if ret < 0 {
            let err = std::io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(Error::Io(err));
        }

        // Set non-blocking
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };

        let async_fd = match AsyncFd::new(fd) {
            Ok(async_fd) => async_fd,
            Err(e) => {
                unsafe { libc::close(fd) };
                return Err(Error::Io(e));
            }
        };

        Ok(Self { async_fd, ifindex })
    }

    fn get_ifindex(fd: RawFd, ifname: &str) -> Result<i32> {
        let ifname_c = CString::new(ifname).map_err(|_| Error::InterfaceNotFound {
            name: ifname.to_string(),
        })?;

        let mut ifr: libc::ifreq = unsafe { std::mem::zeroed() };
        let name_bytes = ifname_c.as_bytes_with_nul();
        if name_bytes.len() > ifr.ifr_name.len() {
            return Err(Error::InterfaceNotFound {
                name: ifname.to_string(),
            });
        }
        ifr.ifr_name[..name_bytes.len()].copy_from_slice(unsafe {
            std::slice::from_raw_parts(name_bytes.as_ptr() as *const libc::c_char, name_bytes.len())
        });

        let ret = unsafe { libc::ioctl(fd, libc::SIOCGIFINDEX, &mut ifr) };
        if ret < 0 {
            return Err(Error::InterfaceNotFound {
                name: ifname.to_string(),
            });
        }

        Ok(unsafe { ifr.ifr_ifru.ifru_ifindex })
    }

    fn attach_filter(fd: RawFd, filter: &[libc::sock_filter]) -> Result<()> {
        let mut insns = filter.to_vec();
        let prog = libc::sock_fprog {
            len: insns.len() as u16,
            filter: insns.as_mut_ptr(),
        };

        let ret = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_ATTACH_FILTER,
                &prog as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::sock_fprog>() as u32,
            )
        };

        if ret < 0 {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }

        Ok(())
    }

    /// Receive a packet (async)
    pub async fn recv(&mut self, buf: &mut [u8]) -> Result<RxInfo> {
        loop {
            let mut guard = self.async_fd.readable_mut().await.map_err(Error::Io)?;

            match guard.try_io(|inner| {
                let fd = *inner.get_ref();
                let n = unsafe { libc::recv(fd, buf.as_mut_ptr() as *mut _, buf.len(), 0) };
                if n < 0 {
                    Err(std::io::Error::last_os_error())
                } else {
                    Ok(n as usize)
                }
            }) {
                Ok(Ok(len)) => return Ok(RxInfo { len }),
                Ok(Err(e)) => return Err(Error::Io(e)),
                Err(_would_block) => continue,
            }
        }
    }

    pub fn ifindex(&self) -> i32 {
        self.ifindex
    }
}

impl AsRawFd for AfPacketSocket {
    fn as_raw_fd(&self) -> RawFd {
        *self.async_fd.get_ref()
    }
}

impl Drop for AfPacketSocket {
    fn drop(&mut self) {
        unsafe { libc::close(*self.async_fd.get_ref()) };
    }
}

impl Capture for AfPacketSocket {
    async fn recv(&mut self, buf: &mut [u8]) -> Result<RxInfo> {
        AfPacketSocket::recv(self, buf).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ra_filter_shape() {
        let filter = ra_filter();
        assert_eq!(filter.len(), 6);
        assert_eq!(filter[0].k, 20);
        assert_eq!(filter[1].k, 58);
        assert_eq!(filter[2].k, 54);
        assert_eq!(filter[3].k, 134);
        // both mismatches land on the reject
        assert_eq!(1 + 1 + filter[1].jf as usize, 5);
        assert_eq!(3 + 1 + filter[3].jf as usize, 5);
        assert_eq!(filter[5].k, 0);
    }
}

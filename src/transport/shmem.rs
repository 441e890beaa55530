//! Shared-memory transport: a System-V segment (`shm:<key>`) or a raw
//! physical-memory window (`mem:<hex-offset>`), bridged to a pollable file
//! descriptor by a forked poller child.
//!
//! Grounded on `examples/original_source/minipc-core.c`'s
//! `__minipc_memlink_create` (parses the `shm:`/`mem:` address forms,
//! `shmget`/`shmat` vs. `open("/dev/mem")`+`mmap`, then forks the poller)
//! and `__minipc_child` (the forked child's loop: watch the sequence
//! counters, write a byte to the pipe on change, exit once its parent is
//! gone). `nix`/`libc` supply the raw syscalls the `shared_memory` crate
//! can't: that crate addresses segments by name, not by a numeric SysV key
//! or a physical offset, so it doesn't fit this transport at all.

use crate::config;
use crate::error::{Error, Result};
use crate::packet::SharedLayout;
use crate::transport::{ReadySet, Role};
use nix::sys::signal::{self, Signal};
use nix::unistd::{fork, ForkResult, Pid};
use os_pipe::{PipeReader, PipeWriter};
use std::ffi::CString;
use std::io::Read;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::Ordering;
use std::time::Duration;

const DEV_MEM: &str = "/dev/mem";

enum Backend {
    Sysv { shmid: i32 },
    Phys { len: usize },
}

/// Parsed form of a shared-memory channel name: either a SysV key or a
/// physical address, per spec section 4.4's two address forms.
enum AddressSpec {
    SysvKey(i32),
    Physical(usize),
}

fn parse_address(name: &str) -> Result<AddressSpec> {
    if let Some(rest) = name.strip_prefix("shm:") {
        let key = if let Some(hex) = rest.strip_prefix("0x") {
            i32::from_str_radix(hex, 16)
        } else {
            rest.parse()
        }
        .map_err(|_| Error::protocol(format!("invalid shm key '{rest}'")))?;
        Ok(AddressSpec::SysvKey(key))
    } else if let Some(rest) = name.strip_prefix("mem:") {
        let rest = rest.strip_prefix("0x").unwrap_or(rest);
        let addr = usize::from_str_radix(rest, 16)
            .map_err(|_| Error::protocol(format!("invalid physical address '{rest}'")))?;
        Ok(AddressSpec::Physical(addr))
    } else {
        Err(Error::Invalid)
    }
}

pub struct ShmemTransport {
    backend: Backend,
    addr: *mut SharedLayout,
    role: Role,
    poller_pid: Option<Pid>,
    poller_pipe: Option<PipeReader>,
}

// The raw pointer is into memory shared across processes by construction;
// a channel is used from a single thread at a time, matching the rest of
// the crate's cooperative, non-threaded dispatch model.
unsafe impl Send for ShmemTransport {}

impl ShmemTransport {
    pub fn open(role: Role, name: &str) -> Result<Self> {
        let spec = parse_address(name)?;
        let (backend, addr) = match spec {
            AddressSpec::SysvKey(key) => Self::open_sysv(role, key)?,
            AddressSpec::Physical(offset) => Self::open_phys(offset)?,
        };
        let mut transport = ShmemTransport {
            backend,
            addr,
            role,
            poller_pid: None,
            poller_pipe: None,
        };
        transport.spawn_poller()?;
        Ok(transport)
    }

    fn open_sysv(role: Role, key: i32) -> Result<(Backend, *mut SharedLayout)> {
        // The original creates the segment with IPC_CREAT regardless of
        // which side opens it first, world-read/write (0666) since either
        // process may win the race to create it.
        let shmid = unsafe {
            libc::shmget(key as libc::key_t, SharedLayout::SIZE, libc::IPC_CREAT | 0o666)
        };
        if shmid < 0 {
            return Err(Error::Os(std::io::Error::last_os_error()));
        }
        let raw = unsafe { libc::shmat(shmid, std::ptr::null(), libc::SHM_RND) };
        if raw as isize == -1 {
            return Err(Error::Os(std::io::Error::last_os_error()));
        }
        if role == Role::Server {
            unsafe {
                std::ptr::write_bytes(raw as *mut u8, 0, SharedLayout::SIZE);
            }
        }
        Ok((Backend::Sysv { shmid }, raw as *mut SharedLayout))
    }

    fn open_phys(offset: usize) -> Result<(Backend, *mut SharedLayout)> {
        let path = CString::new(DEV_MEM).unwrap();
        let fd = unsafe { libc::open(path.as_ptr(), libc::O_RDWR | libc::O_SYNC) };
        if fd < 0 {
            return Err(Error::Os(std::io::Error::last_os_error()));
        }
        let len = SharedLayout::SIZE;
        let raw = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                offset as libc::off_t,
            )
        };
        unsafe {
            libc::close(fd);
        }
        if raw == libc::MAP_FAILED {
            return Err(Error::Os(std::io::Error::last_os_error()));
        }
        Ok((Backend::Phys { len }, raw as *mut SharedLayout))
    }

    /// Fork the poller child: it watches the two sequence counters and
    /// writes a single byte to the pipe whenever either one advances,
    /// giving the parent a pollable readiness signal without busy-waiting
    /// in the main dispatch loop itself.
    fn spawn_poller(&mut self) -> Result<()> {
        let (reader, writer) = os_pipe::pipe().map_err(Error::Os)?;
        let addr = self.addr as usize;
        let parent = nix::unistd::getpid();

        match unsafe { fork() }.map_err(|e| Error::Os(std::io::Error::from_raw_os_error(e as i32)))? {
            ForkResult::Parent { child } => {
                drop(writer);
                self.poller_pid = Some(child);
                self.poller_pipe = Some(reader);
                Ok(())
            }
            ForkResult::Child => {
                drop(reader);
                poller_loop(addr, writer, parent);
                std::process::exit(0);
            }
        }
    }

    pub fn shared(&self) -> &SharedLayout {
        unsafe { &*self.addr }
    }

    #[allow(clippy::mut_from_ref)]
    pub fn shared_mut(&self) -> &mut SharedLayout {
        unsafe { &mut *self.addr }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn poller_pid(&self) -> Option<i32> {
        self.poller_pid.map(|p| p.as_raw())
    }

    /// Drain the poller's wakeup byte(s) so the next `poll()` blocks
    /// instead of returning immediately on a stale readiness notice.
    pub fn drain_wakeups(&mut self) {
        if let Some(pipe) = self.poller_pipe.as_mut() {
            let mut buf = [0u8; 64];
            loop {
                match pipe.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) if n < buf.len() => break,
                    Ok(_) => continue,
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                    Err(_) => break,
                }
            }
        }
    }

    pub fn ready_set(&self) -> ReadySet {
        let mut set = ReadySet::new();
        if let Some(pipe) = &self.poller_pipe {
            set.push(pipe.as_raw_fd());
        }
        set
    }

    pub fn pipe_fd(&self) -> Option<RawFd> {
        self.poller_pipe.as_ref().map(|p| p.as_raw_fd())
    }
}

/// The poller child's body: sleep for the configured interval, check
/// whether either sequence counter moved since last look, and if so (or if
/// the parent has exited) act accordingly.
fn poller_loop(addr: usize, mut writer: PipeWriter, parent: nix::unistd::Pid) -> ! {
    let layout = unsafe { &*(addr as *const SharedLayout) };
    let mut last_request = layout.nrequest.load(Ordering::Acquire);
    let mut last_reply = layout.nreply.load(Ordering::Acquire);
    loop {
        std::thread::sleep(Duration::from_micros(config::poll_interval()));
        if nix::unistd::getppid() != parent {
            std::process::exit(0);
        }
        let nreq = layout.nrequest.load(Ordering::Acquire);
        let nrep = layout.nreply.load(Ordering::Acquire);
        if nreq != last_request || nrep != last_reply {
            last_request = nreq;
            last_reply = nrep;
            if std::io::Write::write_all(&mut writer, &[1u8]).is_err() {
                std::process::exit(0);
            }
        }
    }
}

impl Drop for ShmemTransport {
    fn drop(&mut self) {
        if let Some(pid) = self.poller_pid.take() {
            let _ = signal::kill(pid, Signal::SIGTERM);
            let _ = nix::sys::wait::waitpid(pid, None);
        }
        match self.backend {
            Backend::Sysv { shmid } => unsafe {
                libc::shmdt(self.addr as *const libc::c_void);
                if self.role == Role::Server {
                    libc::shmctl(shmid, libc::IPC_RMID, std::ptr::null_mut());
                }
            },
            Backend::Phys { len } => unsafe {
                libc::munmap(self.addr as *mut libc::c_void, len);
            },
        }
    }
}

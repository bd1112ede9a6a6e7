//! Terminal probing and input-mode helpers.
//!
//! On Unix these go through `nix`; the window-size query is the one raw
//! `ioctl`. Other platforms get conservative answers (no tty, default size,
//! no mode changes).

use std::io;
#[cfg(unix)]
use std::os::fd::{AsFd, AsRawFd, OwnedFd};

#[cfg(unix)]
use nix::errno::Errno;
#[cfg(unix)]
use nix::fcntl::{fcntl, FcntlArg};
#[cfg(unix)]
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
#[cfg(unix)]
use nix::sys::termios::{tcgetattr, tcsetattr, LocalFlags, SetArg, SpecialCharacterIndices, Termios};
#[cfg(unix)]
use nix::unistd::{getpgrp, tcgetpgrp};

use crate::pty::PtySize;

/// Bytes requested per read of local input.
#[cfg(unix)]
const INPUT_READ_SIZE: usize = 1000;

/// Size of the terminal attached to our stdout, or 80x24 when it cannot be
/// determined.
pub fn pty_size() -> PtySize {
    window_size(&io::stdout()).unwrap_or_default()
}

/// Query the window size of the terminal behind `fd`.
#[cfg(unix)]
pub fn window_size<F: AsFd>(fd: &F) -> Option<PtySize> {
    let mut ws = libc::winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    // SAFETY: TIOCGWINSZ only writes into the winsize we own.
    let rc = unsafe {
        libc::ioctl(
            fd.as_fd().as_raw_fd(),
            libc::TIOCGWINSZ,
            &mut ws as *mut libc::winsize,
        )
    };
    if rc == -1 || ws.ws_row == 0 || ws.ws_col == 0 {
        return None;
    }
    Some(PtySize::new(ws.ws_row, ws.ws_col))
}

#[cfg(not(unix))]
pub fn window_size<F>(_fd: &F) -> Option<PtySize> {
    None
}

/// Whether `fd` refers to a terminal.
#[cfg(unix)]
pub fn isatty<F: AsFd>(fd: &F) -> bool {
    use std::io::IsTerminal;
    fd.as_fd().is_terminal()
}

#[cfg(not(unix))]
pub fn isatty<F>(_fd: &F) -> bool {
    false
}

/// Whether `fd` is an open descriptor at all.
#[cfg(unix)]
pub fn has_fileno<F: AsFd>(fd: &F) -> bool {
    fcntl(fd.as_fd().as_raw_fd(), FcntlArg::F_GETFD).is_ok()
}

#[cfg(not(unix))]
pub fn has_fileno<F>(_fd: &F) -> bool {
    false
}

/// Whether our process group owns the terminal behind `fd`.
#[cfg(unix)]
pub fn is_foreground<F: AsFd>(fd: &F) -> bool {
    tcgetpgrp(fd.as_fd()).is_ok_and(|group| group == getpgrp())
}

#[cfg(not(unix))]
pub fn is_foreground<F>(_fd: &F) -> bool {
    false
}

/// Whether a read on `fd` would return without blocking.
#[cfg(unix)]
pub fn ready_for_reading<F: AsFd>(fd: &F) -> bool {
    let mut fds = [PollFd::new(fd.as_fd(), PollFlags::POLLIN)];
    match poll(&mut fds, PollTimeout::ZERO) {
        Ok(n) if n > 0 => fds[0].revents().is_some_and(|revents| {
            revents.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR)
        }),
        _ => false,
    }
}

#[cfg(not(unix))]
pub fn ready_for_reading<F>(_fd: &F) -> bool {
    true
}

/// Read whatever `fd` has pending, without going through std's buffered
/// handles (which would hide pending data from `poll`).
///
/// An empty result means end-of-file.
#[cfg(unix)]
pub fn read_fd<F: AsFd>(fd: &F) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; INPUT_READ_SIZE];
    loop {
        match nix::unistd::read(fd.as_fd().as_raw_fd(), &mut buf) {
            Ok(n) => {
                buf.truncate(n);
                return Ok(buf);
            }
            Err(Errno::EINTR) => continue,
            Err(errno) => return Err(errno.into()),
        }
    }
}

#[cfg(not(unix))]
pub fn read_fd<F>(_fd: &F) -> io::Result<Vec<u8>> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "raw descriptor reads are not supported on this platform",
    ))
}

/// Puts a terminal into character-buffered (cbreak) mode and restores the
/// previous settings when dropped.
pub struct CbreakGuard {
    #[cfg(unix)]
    saved: Option<(OwnedFd, Termios)>,
}

impl CbreakGuard {
    /// A guard that changed nothing.
    pub fn inactive() -> Self {
        Self {
            #[cfg(unix)]
            saved: None,
        }
    }

    /// Whether this guard will restore terminal settings on drop.
    pub fn is_active(&self) -> bool {
        #[cfg(unix)]
        {
            self.saved.is_some()
        }
        #[cfg(not(unix))]
        {
            false
        }
    }
}

impl Drop for CbreakGuard {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some((fd, saved)) = self.saved.take() {
            if let Err(errno) = tcsetattr(&fd, SetArg::TCSADRAIN, &saved) {
                tracing::warn!("failed to restore terminal mode: {errno}");
            }
        }
    }
}

/// Switch `fd` to cbreak mode for the lifetime of the returned guard.
///
/// Nothing changes when `fd` is not an interactive terminal, when our
/// process is not in the terminal's foreground group, or when echo and
/// canonical mode are already off.
#[cfg(unix)]
pub fn character_buffered<F: AsFd>(fd: &F) -> io::Result<CbreakGuard> {
    if !isatty(fd) || !is_foreground(fd) {
        return Ok(CbreakGuard::inactive());
    }

    let saved = tcgetattr(fd.as_fd())?;
    if !saved
        .local_flags
        .intersects(LocalFlags::ECHO | LocalFlags::ICANON)
    {
        return Ok(CbreakGuard::inactive());
    }

    let mut cbreak = saved.clone();
    cbreak.local_flags.remove(LocalFlags::ECHO | LocalFlags::ICANON);
    cbreak.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
    cbreak.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;

    // Our own handle, so the guard can restore the mode on drop.
    let owned = fd.as_fd().try_clone_to_owned()?;
    tcsetattr(&owned, SetArg::TCSAFLUSH, &cbreak)?;
    tracing::debug!(fd = owned.as_raw_fd(), "terminal switched to cbreak mode");

    Ok(CbreakGuard {
        saved: Some((owned, saved)),
    })
}

#[cfg(not(unix))]
pub fn character_buffered<F>(_fd: &F) -> io::Result<CbreakGuard> {
    Ok(CbreakGuard::inactive())
}

//! A two-process rendezvous built on a SysV-style counting semaphore.
//!
//! Wraps the raw `semget`/`semop`/`semctl` syscalls the same way [`crate::platform`]
//! wraps `clone`: a small safe type around an `Errno::result` call. Used only
//! for the two handshakes the engine needs — parent/entry and entry/payload —
//! gating writes to `/proc/<pid>/uid_map` et al.

use nix::errno::Errno;

use crate::Error;

/// A single counting semaphore, created with initial value 0.
pub struct Semaphore {
    id: libc::c_int,
}

impl Semaphore {
    /// Creates (or re-opens, idempotently) the semaphore set named by `key`
    /// and resets it to 0. The key is conventionally derived from a process
    /// id (§9 notes this is not collision-free under adversarial conditions;
    /// callers needing a stronger guarantee may hash a UUID into the key
    /// instead — the contract above only cares that both ends agree on it).
    pub fn init(key: i32) -> Result<Self, Error> {
        let sem = Self::open(key)?;
        sem.set(0)?;
        Ok(sem)
    }

    /// Attaches to the semaphore set named by `key` without resetting its
    /// value, creating it if absent. Used by the non-creating side of a
    /// rendezvous (entry, payload) so attaching never clobbers a value the
    /// creator already established.
    pub fn open(key: i32) -> Result<Self, Error> {
        let id = unsafe { libc::semget(key, 1, libc::IPC_CREAT | 0o600) };
        let id = Errno::result(id).map_err(|v| format!("semget failed: {v}"))?;
        Ok(Self { id })
    }

    fn set(&self, value: libc::c_int) -> Result<(), Error> {
        let res = unsafe { libc::semctl(self.id, 0, libc::SETVAL, value) };
        Errno::result(res).map_err(|v| format!("semctl(SETVAL) failed: {v}"))?;
        Ok(())
    }

    /// V: increments the semaphore, waking one waiter.
    pub fn post(&self) -> Result<(), Error> {
        self.op(1)
    }

    /// P: decrements the semaphore, blocking while its value is 0.
    pub fn wait(&self) -> Result<(), Error> {
        self.op(-1)
    }

    fn op(&self, delta: libc::c_short) -> Result<(), Error> {
        let mut buf = libc::sembuf {
            sem_num: 0,
            sem_op: delta,
            sem_flg: 0,
        };
        loop {
            let res = unsafe { libc::semop(self.id, &mut buf, 1) };
            match Errno::result(res) {
                Ok(_) => return Ok(()),
                Err(Errno::EINTR) => continue,
                Err(err) => return Err(format!("semop failed: {err}").into()),
            }
        }
    }

    /// Removes the underlying kernel semaphore set.
    pub fn destroy(self) -> Result<(), Error> {
        let res = unsafe { libc::semctl(self.id, 0, libc::IPC_RMID) };
        Errno::result(res).map_err(|v| format!("semctl(IPC_RMID) failed: {v}"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn post_wakes_a_blocked_wait() {
        let sem = Arc::new(Semaphore::init(0x5A17_0001).unwrap());
        let woke = Arc::new(AtomicBool::new(false));
        let sem2 = sem.clone();
        let woke2 = woke.clone();
        let handle = thread::spawn(move || {
            sem2.wait().unwrap();
            woke2.store(true, Ordering::SeqCst);
        });
        thread::sleep(Duration::from_millis(50));
        assert!(!woke.load(Ordering::SeqCst));
        sem.post().unwrap();
        handle.join().unwrap();
        assert!(woke.load(Ordering::SeqCst));
        Arc::try_unwrap(sem).ok().unwrap().destroy().unwrap();
    }
}

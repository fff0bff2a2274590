//! Named views onto a shared session, one per register

use crate::{
    core::RegisterDescriptor,
    error::{
        Error,
        Result,
    },
    handle::ResultHandle,
    session::{
        Session,
        SharedSession,
    },
    transport::Transport,
};
use kstring::KString;
use std::sync::{
    Arc,
    Mutex,
    Weak,
};

/// A handle to one register of a shared [`Session`]. Every call locks the session for its
/// duration, so nodes can be used from several threads.
#[derive(Debug)]
pub struct Node<T>
where
    T: Transport,
{
    /// Upwards pointer to the session the register lives in
    session: Weak<Mutex<Session<T>>>,
    /// The name of the register
    name: KString,
}

impl<T> Clone for Node<T>
where
    T: Transport,
{
    fn clone(&self) -> Self {
        Self {
            session: Weak::clone(&self.session),
            name: self.name.clone(),
        }
    }
}

impl<T> Node<T>
where
    T: Transport,
{
    /// Create a view of the register `name`
    /// # Errors
    /// Returns an error if the register isn't in the session's address table
    pub fn new(session: &SharedSession<T>, name: &str) -> Result<Self> {
        let guard = session.lock().map_err(|_| Error::SessionClosed)?;
        guard.table().resolve(name)?;
        Ok(Self {
            session: Arc::downgrade(session),
            name: KString::from_ref(name),
        })
    }

    fn with_session<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Session<T>) -> Result<R>,
    {
        let session = self.session.upgrade().ok_or(Error::SessionClosed)?;
        let mut guard = session.lock().map_err(|_| Error::SessionClosed)?;
        f(&mut guard)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// A copy of this register's descriptor
    /// # Errors
    /// Returns an error if the session is gone
    pub fn descriptor(&self) -> Result<RegisterDescriptor> {
        self.with_session(|s| s.table().resolve(&self.name).cloned())
    }

    /// See [`Session::read`]
    /// # Errors
    /// Returns an error if the session is gone or the read is rejected
    pub fn read(&self) -> Result<ResultHandle<u32>> {
        self.with_session(|s| s.read(&self.name))
    }

    /// See [`Session::write`]
    /// # Errors
    /// Returns an error if the session is gone or the write is rejected
    pub fn write(&self, value: u32) -> Result<()> {
        self.with_session(|s| s.write(&self.name, value))
    }

    /// See [`Session::read_block`]
    /// # Errors
    /// Returns an error if the session is gone or the read is rejected
    pub fn read_block(&self, count: usize) -> Result<ResultHandle<Vec<u32>>> {
        self.with_session(|s| s.read_block(&self.name, count))
    }

    /// See [`Session::write_block`]
    /// # Errors
    /// Returns an error if the session is gone or the write is rejected
    pub fn write_block(&self, values: &[u32]) -> Result<()> {
        self.with_session(|s| s.write_block(&self.name, values))
    }

    /// Dispatch everything pending on the session, not just this node's operations
    /// # Errors
    /// See [`Session::dispatch`]
    pub fn dispatch(&self) -> Result<()> {
        self.with_session(Session::dispatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::AddressTable,
        transport::mock::Mock,
    };
    use std::thread;

    fn shared() -> SharedSession<Mock> {
        let table = AddressTable::try_from(vec![
            RegisterDescriptor::new("REG", 0x6000_0000),
            RegisterDescriptor::new("REGMASK", 0x6000_0000)
                .with_mask(0x0f0f_0f0f)
                .unwrap(),
            RegisterDescriptor::new("MEM", 0x7000_0000)
                .incremental(16)
                .unwrap(),
        ])
        .unwrap();
        Session::new(Mock::new(), table).unwrap().into_shared()
    }

    #[test]
    fn test_read_write() {
        let session = shared();
        let reg = Node::new(&session, "REG").unwrap();
        let mask = Node::new(&session, "REGMASK").unwrap();
        reg.write(0x0123_4567).unwrap();
        let masked = mask.read().unwrap();
        mask.dispatch().unwrap();
        assert_eq!(masked.value().unwrap(), 0x0103_0507);
        assert_eq!(mask.descriptor().unwrap().mask, 0x0f0f_0f0f);
    }

    #[test]
    fn test_blocks() {
        let session = shared();
        let mem = Node::new(&session, "MEM").unwrap();
        mem.write_block(&[5, 6, 7]).unwrap();
        let back = mem.read_block(3).unwrap();
        mem.dispatch().unwrap();
        assert_eq!(back.value().unwrap(), vec![5, 6, 7]);
    }

    #[test]
    fn test_unknown_register() {
        assert!(matches!(
            Node::new(&shared(), "NOPE"),
            Err(Error::UnknownRegister(_))
        ));
    }

    #[test]
    fn test_session_closed() {
        let session = shared();
        let reg = Node::new(&session, "REG").unwrap();
        drop(session);
        assert!(matches!(reg.read(), Err(Error::SessionClosed)));
        assert!(matches!(reg.dispatch(), Err(Error::SessionClosed)));
    }

    #[test]
    fn test_shared_across_threads() {
        let session = shared();
        let reg = Node::new(&session, "REG").unwrap();
        let writer = reg.clone();
        thread::spawn(move || {
            writer.write(42).unwrap();
            writer.dispatch().unwrap();
        })
        .join()
        .unwrap();
        let value = reg.read().unwrap();
        reg.dispatch().unwrap();
        assert_eq!(value.value().unwrap(), 42);
    }
}

//! Blocking synchronization primitives, all built on
//! [`crate::thread::WaitQueue`]: semaphore, non-recursive and recursive
//! mutex, condition variable, and a writer-preferring reader/writer
//! lock.

pub mod condvar;
pub mod mutex;
pub mod rmutex;
pub mod rwlock;
pub mod semaphore;

pub use condvar::CondVar;
pub use mutex::KMutex;
pub use rmutex::RMutex;
pub use rwlock::RwLock;
pub use semaphore::Semaphore;

//! Vector: flat scalar storage with host/device residency and scoped access.
//!
//! A [`Vector`] is a shared handle to a logically flat buffer of scalars.
//! The buffer may hold copies in more than one memory space at a time; a
//! validity flag per space tracks which copies are current. Synchronization
//! is lazy and happens only at view acquire/release boundaries: requesting
//! a view in a space whose copy is stale triggers a copy-in from a valid
//! space, and releasing a write view marks every other space stale.
//!
//! Access follows a single-writer/multi-reader discipline enforced at
//! runtime: any number of read views may be outstanding at once, but
//! requesting a view that conflicts with an outstanding one is a caller
//! error reported as [`QuadrilleError::AccessConflict`], never a silent
//! race and never a blocking wait. There is no background synchronization
//! thread; everything happens on the calling thread.

pub mod device;
#[cfg(feature = "wgpu")]
pub mod wgpu;

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::{ArcRwLockReadGuard, ArcRwLockWriteGuard, RawRwLock, RwLock};

use crate::Scalar;
use crate::error::QuadrilleError;

pub use device::DeviceBuffer;
#[cfg(feature = "wgpu")]
pub use wgpu::WgpuBuffer;

/// Canonical bound set for values storable in a [`Vector`].
///
/// Blanket-implemented; it exists only to reduce duplication in `where`
/// clauses. `Copy + Default` keep the gather/scatter hot loops
/// allocation-free; `Send + Sync + 'static` let vectors cross thread and
/// device boundaries.
pub trait VectorValue: Copy + Default + Send + Sync + fmt::Debug + 'static {}
impl<T> VectorValue for T where T: Copy + Default + Send + Sync + fmt::Debug + 'static {}

/// Memory space a view may be requested in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum MemSpace {
    /// CPU-addressable memory.
    Host,
    /// Memory owned by an attached [`DeviceBuffer`].
    Device,
}

/// Norm kind for [`Vector::norm`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum NormType {
    /// Sum of absolute values.
    One,
    /// Euclidean norm.
    Two,
    /// Largest absolute value.
    Max,
}

/// Buffers and residency flags, guarded by the vector's lock.
///
/// Invariant: at least one space is valid at all times, and a space marked
/// valid holds the current logical contents. The host buffer is always
/// allocated; the device buffer exists only after [`Vector::attach_device`].
struct VectorData<V: VectorValue> {
    host: Vec<V>,
    host_valid: bool,
    device: Option<Box<dyn DeviceBuffer<V>>>,
    device_valid: bool,
}

impl<V: VectorValue> VectorData<V> {
    /// Make the host copy current, downloading from the device if needed.
    fn sync_host(&mut self) -> Result<(), QuadrilleError> {
        if self.host_valid {
            return Ok(());
        }
        // Host is stale, so by the residency invariant the device copy is
        // current and the backend exists.
        let dev = self.device.as_ref().ok_or(QuadrilleError::NoDeviceBackend)?;
        dev.download(&mut self.host)?;
        self.host_valid = true;
        log::trace!("vector: synced {} values device -> host", self.host.len());
        Ok(())
    }

    /// Make the device copy current, uploading from the host if needed.
    fn sync_device(&mut self) -> Result<(), QuadrilleError> {
        let dev = self
            .device
            .as_mut()
            .ok_or(QuadrilleError::NoDeviceBackend)?;
        if !self.device_valid {
            dev.upload(&self.host)?;
            self.device_valid = true;
            log::trace!("vector: synced {} values host -> device", self.host.len());
        }
        Ok(())
    }
}

/// A shared, resizable-at-creation flat buffer of scalar values with
/// host/device residency tracking and scoped access control.
///
/// Cloning a `Vector` produces another handle to the same storage; the
/// storage is freed when the last handle is dropped. See the module docs
/// for the access and synchronization rules.
pub struct Vector<V: VectorValue = Scalar> {
    data: Arc<RwLock<VectorData<V>>>,
    len: usize,
}

static_assertions::assert_impl_all!(Vector<Scalar>: Send, Sync, Clone);

impl<V: VectorValue> Clone for Vector<V> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            len: self.len,
        }
    }
}

impl<V: VectorValue> fmt::Debug for Vector<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("Vector");
        dbg.field("len", &self.len);
        match self.data.try_read() {
            Some(data) => dbg
                .field("host_valid", &data.host_valid)
                .field("device_valid", &data.device_valid)
                .finish(),
            None => dbg.field("state", &"<view outstanding>").finish(),
        }
    }
}

impl<V: VectorValue> Vector<V> {
    /// Create a vector of `len` values, zero-initialized on the host.
    pub fn new(len: usize) -> Self {
        Self {
            data: Arc::new(RwLock::new(VectorData {
                host: vec![V::default(); len],
                host_valid: true,
                device: None,
                device_valid: false,
            })),
            len,
        }
    }

    /// Create a vector holding a copy of `values`.
    pub fn from_slice(values: &[V]) -> Self {
        let v = Self::new(values.len());
        // A freshly created vector has no outstanding views.
        if let Some(mut data) = v.data.try_write() {
            data.host.copy_from_slice(values);
        }
        v
    }

    /// Logical length, fixed at creation.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if the vector holds no values.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Attach a device buffer, enabling [`MemSpace::Device`] views.
    ///
    /// The buffer starts stale; the first device view uploads the host
    /// contents.
    ///
    /// # Errors
    /// - [`QuadrilleError::VectorSizeMismatch`] if the buffer length differs
    ///   from the vector length
    /// - [`QuadrilleError::AccessConflict`] if any view is outstanding
    pub fn attach_device(&self, buffer: Box<dyn DeviceBuffer<V>>) -> Result<(), QuadrilleError> {
        if buffer.len() != self.len {
            return Err(QuadrilleError::VectorSizeMismatch {
                role: "device buffer",
                expected: self.len,
                found: buffer.len(),
            });
        }
        let mut data = self
            .data
            .try_write_arc()
            .ok_or(QuadrilleError::AccessConflict {
                requested: "write",
            })?;
        // Replacing a buffer that holds the only current copy would lose
        // data; pull it back to the host first.
        if data.device_valid {
            data.sync_host()?;
        }
        data.device = Some(buffer);
        data.device_valid = false;
        Ok(())
    }

    /// Set every entry to `value`.
    ///
    /// # Errors
    /// [`QuadrilleError::AccessConflict`] if any view is outstanding.
    pub fn set_value(&self, value: V) -> Result<(), QuadrilleError> {
        let mut view = self.write_only(MemSpace::Host)?;
        view.fill(value);
        Ok(())
    }

    /// Acquire a read view in `space`.
    ///
    /// If the requested space's copy is stale the view acquisition performs
    /// the copy-in; this mutation requires momentary exclusive access, so a
    /// sync-triggering read fails fast if other views are outstanding.
    /// Reads of an already-valid space may be held concurrently. Device
    /// views stage the buffer through host memory.
    ///
    /// # Errors
    /// - [`QuadrilleError::AccessConflict`] on a conflicting outstanding view
    /// - [`QuadrilleError::NoDeviceBackend`] for `Device` with no buffer attached
    pub fn read(&self, space: MemSpace) -> Result<ReadView<V>, QuadrilleError> {
        let conflict = QuadrilleError::AccessConflict { requested: "read" };
        match space {
            MemSpace::Host => {
                let guard = self.data.try_read_arc().ok_or(conflict.clone())?;
                if guard.host_valid {
                    return Ok(ReadView {
                        guard,
                        staged: None,
                    });
                }
                drop(guard);
                let mut guard = self.data.try_write_arc().ok_or(conflict)?;
                guard.sync_host()?;
                Ok(ReadView {
                    guard: ArcRwLockWriteGuard::downgrade(guard),
                    staged: None,
                })
            }
            MemSpace::Device => {
                let guard = self.data.try_read_arc().ok_or(conflict.clone())?;
                if guard.device_valid {
                    let dev = guard
                        .device
                        .as_ref()
                        .ok_or(QuadrilleError::NoDeviceBackend)?;
                    let mut staged = vec![V::default(); self.len];
                    dev.download(&mut staged)?;
                    return Ok(ReadView {
                        guard,
                        staged: Some(staged),
                    });
                }
                drop(guard);
                let mut guard = self.data.try_write_arc().ok_or(conflict)?;
                guard.sync_device()?;
                // Host stays valid across sync_device, so the staged copy
                // can skip a device round trip.
                let staged = guard.host.clone();
                Ok(ReadView {
                    guard: ArcRwLockWriteGuard::downgrade(guard),
                    staged: Some(staged),
                })
            }
        }
    }

    /// Acquire a read-write view in `space`, syncing that space first so
    /// the view starts from the current contents.
    ///
    /// While the view is outstanding no other view can be acquired; on
    /// release every other space is marked stale.
    ///
    /// # Errors
    /// As for [`Vector::read`].
    pub fn write(&self, space: MemSpace) -> Result<WriteView<V>, QuadrilleError> {
        let mut guard = self
            .data
            .try_write_arc()
            .ok_or(QuadrilleError::AccessConflict {
                requested: "read-write",
            })?;
        let staged = match space {
            MemSpace::Host => {
                guard.sync_host()?;
                None
            }
            MemSpace::Device => {
                guard.sync_device()?;
                if guard.host_valid {
                    Some(guard.host.clone())
                } else {
                    let dev = guard
                        .device
                        .as_ref()
                        .ok_or(QuadrilleError::NoDeviceBackend)?;
                    let mut staged = vec![V::default(); self.len];
                    dev.download(&mut staged)?;
                    Some(staged)
                }
            }
        };
        Ok(WriteView {
            guard,
            space,
            staged,
        })
    }

    /// Acquire a write-only view in `space`, skipping the copy-in.
    ///
    /// The view's initial contents are unspecified; callers must overwrite
    /// every entry they later read. Release semantics match
    /// [`Vector::write`].
    ///
    /// # Errors
    /// As for [`Vector::read`].
    pub fn write_only(&self, space: MemSpace) -> Result<WriteView<V>, QuadrilleError> {
        let guard = self
            .data
            .try_write_arc()
            .ok_or(QuadrilleError::AccessConflict {
                requested: "write",
            })?;
        if space == MemSpace::Device && guard.device.is_none() {
            return Err(QuadrilleError::NoDeviceBackend);
        }
        let staged = match space {
            MemSpace::Host => None,
            MemSpace::Device => Some(vec![V::default(); self.len]),
        };
        Ok(WriteView {
            guard,
            space,
            staged,
        })
    }

    /// Ensure `space` holds a current copy, without handing out a view.
    ///
    /// After a successful sync both spaces are valid until the next write.
    ///
    /// # Errors
    /// As for [`Vector::read`].
    pub fn sync_to(&self, space: MemSpace) -> Result<(), QuadrilleError> {
        let mut guard = self
            .data
            .try_write_arc()
            .ok_or(QuadrilleError::AccessConflict {
                requested: "read-write",
            })?;
        match space {
            MemSpace::Host => guard.sync_host(),
            MemSpace::Device => guard.sync_device(),
        }
    }
}

impl<V: VectorValue + num_traits::Float> Vector<V> {
    /// Compute a norm of the vector, reading through the host space.
    pub fn norm(&self, norm_type: NormType) -> Result<V, QuadrilleError> {
        let view = self.read(MemSpace::Host)?;
        let norm = match norm_type {
            NormType::One => view.iter().fold(V::zero(), |acc, &x| acc + x.abs()),
            NormType::Two => view
                .iter()
                .fold(V::zero(), |acc, &x| acc + x * x)
                .sqrt(),
            NormType::Max => view.iter().fold(V::zero(), |acc, &x| acc.max(x.abs())),
        };
        Ok(norm)
    }
}

/// RAII read view over a vector's contents in one memory space.
///
/// Dereferences to `&[V]`. Dropping the view releases the access.
pub struct ReadView<V: VectorValue> {
    guard: ArcRwLockReadGuard<RawRwLock, VectorData<V>>,
    /// Device views hold a host-staged copy of the device contents.
    staged: Option<Vec<V>>,
}

impl<V: VectorValue> Deref for ReadView<V> {
    type Target = [V];

    #[inline]
    fn deref(&self) -> &[V] {
        match &self.staged {
            Some(staged) => staged,
            None => &self.guard.host,
        }
    }
}

impl<V: VectorValue> fmt::Debug for ReadView<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadView").field("len", &self.len()).finish()
    }
}

/// RAII exclusive view over a vector's contents in one memory space.
///
/// Dereferences to `&mut [V]`. On drop the written space becomes the only
/// valid copy; device views upload their staged contents back.
pub struct WriteView<V: VectorValue> {
    guard: ArcRwLockWriteGuard<RawRwLock, VectorData<V>>,
    space: MemSpace,
    /// Device views write into a host-staged buffer, uploaded on drop.
    staged: Option<Vec<V>>,
}

impl<V: VectorValue> Deref for WriteView<V> {
    type Target = [V];

    #[inline]
    fn deref(&self) -> &[V] {
        match &self.staged {
            Some(staged) => staged,
            None => &self.guard.host,
        }
    }
}

impl<V: VectorValue> DerefMut for WriteView<V> {
    #[inline]
    fn deref_mut(&mut self) -> &mut [V] {
        match &mut self.staged {
            Some(staged) => staged,
            None => &mut self.guard.host,
        }
    }
}

impl<V: VectorValue> fmt::Debug for WriteView<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteView")
            .field("len", &self.len())
            .field("space", &self.space)
            .finish()
    }
}

impl<V: VectorValue> Drop for WriteView<V> {
    fn drop(&mut self) {
        match self.space {
            MemSpace::Host => {
                self.guard.host_valid = true;
                self.guard.device_valid = false;
            }
            MemSpace::Device => {
                let staged = self.staged.take().unwrap_or_default();
                match self.guard.device.as_mut() {
                    Some(dev) => {
                        // Drop cannot report failure; the residency flags are
                        // only advanced once the upload succeeded.
                        match dev.upload(&staged) {
                            Ok(()) => {
                                self.guard.device_valid = true;
                                self.guard.host_valid = false;
                            }
                            Err(err) => {
                                log::error!("device upload failed on view release: {err}");
                            }
                        }
                    }
                    None => log::error!("device view released with no device attached"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Host-backed stand-in for an accelerator buffer; counts transfers so
    /// tests can observe the laziness of the residency model.
    #[derive(Debug)]
    struct MockDevice {
        cells: Vec<Scalar>,
        uploads: Arc<AtomicUsize>,
        downloads: Arc<AtomicUsize>,
    }

    impl MockDevice {
        fn new(len: usize) -> (Box<Self>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
            let uploads = Arc::new(AtomicUsize::new(0));
            let downloads = Arc::new(AtomicUsize::new(0));
            let dev = Box::new(Self {
                cells: vec![0.0; len],
                uploads: Arc::clone(&uploads),
                downloads: Arc::clone(&downloads),
            });
            (dev, uploads, downloads)
        }
    }

    impl DeviceBuffer<Scalar> for MockDevice {
        fn len(&self) -> usize {
            self.cells.len()
        }

        fn upload(&mut self, src: &[Scalar]) -> Result<(), QuadrilleError> {
            self.uploads.fetch_add(1, Ordering::SeqCst);
            self.cells.copy_from_slice(src);
            Ok(())
        }

        fn download(&self, dst: &mut [Scalar]) -> Result<(), QuadrilleError> {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            dst.copy_from_slice(&self.cells);
            Ok(())
        }
    }

    #[test]
    fn new_is_zeroed() {
        let v = Vector::<Scalar>::new(4);
        let view = v.read(MemSpace::Host).unwrap();
        assert_eq!(&*view, &[0.0; 4]);
    }

    #[test]
    fn set_value_fills() {
        let v = Vector::<Scalar>::new(3);
        v.set_value(2.5).unwrap();
        let view = v.read(MemSpace::Host).unwrap();
        assert_eq!(&*view, &[2.5, 2.5, 2.5]);
    }

    #[test]
    fn concurrent_reads_allowed() {
        let v = Vector::<Scalar>::from_slice(&[1.0, 2.0]);
        let a = v.read(MemSpace::Host).unwrap();
        let b = v.read(MemSpace::Host).unwrap();
        assert_eq!(a[1], 2.0);
        assert_eq!(b[0], 1.0);
    }

    #[test]
    fn write_conflicts_fail_fast() {
        let v = Vector::<Scalar>::new(2);
        let _w = v.write(MemSpace::Host).unwrap();
        assert!(matches!(
            v.read(MemSpace::Host),
            Err(QuadrilleError::AccessConflict { .. })
        ));
        assert!(matches!(
            v.write(MemSpace::Host),
            Err(QuadrilleError::AccessConflict { .. })
        ));
        assert!(matches!(
            v.set_value(1.0),
            Err(QuadrilleError::AccessConflict { .. })
        ));
    }

    #[test]
    fn write_blocked_by_outstanding_read() {
        let v = Vector::<Scalar>::new(2);
        let _r = v.read(MemSpace::Host).unwrap();
        assert!(matches!(
            v.write(MemSpace::Host),
            Err(QuadrilleError::AccessConflict { .. })
        ));
    }

    #[test]
    fn clone_shares_storage() {
        let v = Vector::<Scalar>::new(2);
        let w = v.clone();
        v.set_value(7.0).unwrap();
        let view = w.read(MemSpace::Host).unwrap();
        assert_eq!(&*view, &[7.0, 7.0]);
    }

    #[test]
    fn device_view_without_backend_errors() {
        let v = Vector::<Scalar>::new(2);
        assert_eq!(
            v.read(MemSpace::Device).unwrap_err(),
            QuadrilleError::NoDeviceBackend
        );
        assert_eq!(
            v.write_only(MemSpace::Device).unwrap_err(),
            QuadrilleError::NoDeviceBackend
        );
    }

    #[test]
    fn attach_rejects_wrong_length() {
        let v = Vector::<Scalar>::new(3);
        let (dev, _, _) = MockDevice::new(2);
        assert!(matches!(
            v.attach_device(dev),
            Err(QuadrilleError::VectorSizeMismatch { .. })
        ));
    }

    #[test]
    fn sync_is_lazy() {
        let v = Vector::<Scalar>::from_slice(&[1.0, 2.0]);
        let (dev, uploads, downloads) = MockDevice::new(2);
        v.attach_device(dev).unwrap();
        // Attaching alone moves nothing.
        assert_eq!(uploads.load(Ordering::SeqCst), 0);

        // First device read uploads once, then stages from the still-valid
        // host copy without a download.
        {
            let view = v.read(MemSpace::Device).unwrap();
            assert_eq!(&*view, &[1.0, 2.0]);
        }
        assert_eq!(uploads.load(Ordering::SeqCst), 1);
        assert_eq!(downloads.load(Ordering::SeqCst), 0);

        // Host reads stay host-local while the host copy is valid.
        let _ = v.read(MemSpace::Host).unwrap();
        assert_eq!(downloads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn device_write_invalidates_host() {
        let v = Vector::<Scalar>::from_slice(&[1.0, 2.0]);
        let (dev, _, downloads) = MockDevice::new(2);
        v.attach_device(dev).unwrap();
        {
            let mut view = v.write_only(MemSpace::Device).unwrap();
            view[0] = 5.0;
            view[1] = 6.0;
        }
        // Host copy is now stale; the next host read downloads.
        let view = v.read(MemSpace::Host).unwrap();
        assert_eq!(&*view, &[5.0, 6.0]);
        assert_eq!(downloads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn host_write_invalidates_device() {
        let v = Vector::<Scalar>::from_slice(&[1.0, 2.0]);
        let (dev, uploads, _) = MockDevice::new(2);
        v.attach_device(dev).unwrap();
        v.sync_to(MemSpace::Device).unwrap();
        assert_eq!(uploads.load(Ordering::SeqCst), 1);
        v.set_value(3.0).unwrap();
        // Device is stale again: the next device view re-uploads.
        let view = v.read(MemSpace::Device).unwrap();
        assert_eq!(&*view, &[3.0, 3.0]);
        assert_eq!(uploads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn read_write_view_preserves_contents() {
        let v = Vector::<Scalar>::from_slice(&[1.0, 2.0, 3.0]);
        {
            let mut view = v.write(MemSpace::Host).unwrap();
            view[1] += 10.0;
        }
        let view = v.read(MemSpace::Host).unwrap();
        assert_eq!(&*view, &[1.0, 12.0, 3.0]);
    }

    #[test]
    fn norms() {
        let v = Vector::<Scalar>::from_slice(&[3.0, -4.0]);
        assert_eq!(v.norm(NormType::One).unwrap(), 7.0);
        assert_eq!(v.norm(NormType::Two).unwrap(), 5.0);
        assert_eq!(v.norm(NormType::Max).unwrap(), 4.0);
    }
}

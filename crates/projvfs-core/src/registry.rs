//! Active-provider registry.
//!
//! A bounded table mapping virtualization-root vnodes to the user-space
//! providers that own them. Slots are recycled; a [`ProviderHandle`]
//! is stamped with the slot's generation so a handle kept across a
//! disconnect cannot touch whoever occupies the slot next.
//!
//! Every read and write of slot state happens under the registry mutex.
//! Nothing that can sleep (path lookup, parent fetches, the provider
//! transport) runs while it is held. Lookups hand out
//! [`ProviderSnapshot`] copies instead of references into the table.

use std::sync::Arc;

use nix::errno::Errno;
use nix::unistd::Pid;
use projvfs_wire::KernelMessage;
use tracing::debug;

use crate::error::HookError;
use crate::locks::{GroupMutex, LockGroup};
use crate::vfs::{Filesystem, ProviderClient};

/// Opaque, generation-stamped reference to a registry slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProviderHandle {
    index: usize,
    generation: u64,
}

#[cfg(test)]
impl ProviderHandle {
    pub(crate) const fn for_tests(index: usize, generation: u64) -> Self {
        Self { index, generation }
    }
}

/// Copy of the provider fields the interceptor needs, taken under the
/// registry mutex and valid regardless of later slot changes.
pub struct ProviderSnapshot {
    /// Handle for follow-up registry operations.
    pub handle: ProviderHandle,
    /// The provider process.
    pub pid: Pid,
    /// Absolute path of the virtualization root.
    pub root_path: String,
    /// The provider's client channel.
    pub client: Arc<dyn ProviderClient>,
}

impl std::fmt::Debug for ProviderSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSnapshot")
            .field("handle", &self.handle)
            .field("pid", &self.pid)
            .field("root_path", &self.root_path)
            .finish_non_exhaustive()
    }
}

struct Slot<V> {
    // A slot is occupied iff `client` is non-null. An occupied slot may
    // have no root yet (registration in progress); an occupied slot with
    // a root holds that handle's use-count until disconnect.
    client: Option<Arc<dyn ProviderClient>>,
    root_vnode: Option<V>,
    root_path: String,
    pid: Pid,
    generation: u64,
}

impl<V> Slot<V> {
    fn vacant() -> Self {
        Self {
            client: None,
            root_vnode: None,
            root_path: String::new(),
            pid: Pid::from_raw(0),
            generation: 0,
        }
    }
}

/// Fixed-capacity table of active providers.
pub struct ProviderRegistry<F: Filesystem> {
    fs: Arc<F>,
    slots: GroupMutex<Vec<Slot<F::Vnode>>>,
    capacity: usize,
    max_path_bytes: usize,
}

impl<F: Filesystem> ProviderRegistry<F> {
    /// Creates a registry with `capacity` vacant slots, its mutex
    /// allocated from `locks`.
    #[must_use]
    pub fn new(fs: Arc<F>, locks: &LockGroup, capacity: usize, max_path_bytes: usize) -> Self {
        let slots = (0..capacity).map(|_| Slot::vacant()).collect();
        Self {
            fs,
            slots: locks.mutex("provider-registry", slots),
            capacity,
            max_path_bytes,
        }
    }

    /// Number of slots in the table.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of occupied slots.
    #[must_use]
    pub fn occupied(&self) -> usize {
        self.slots
            .lock()
            .iter()
            .filter(|slot| slot.client.is_some())
            .count()
    }

    /// Claims the first vacant slot for a connecting client.
    ///
    /// # Errors
    ///
    /// Returns [`HookError::RegistryFull`] when every slot is occupied.
    pub fn register_client(
        &self,
        client: Arc<dyn ProviderClient>,
        pid: Pid,
    ) -> Result<ProviderHandle, HookError> {
        let mut slots = self.slots.lock();
        let Some((index, slot)) = slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.client.is_none())
        else {
            return Err(HookError::RegistryFull {
                capacity: self.capacity,
            });
        };

        debug_assert!(slot.root_vnode.is_none(), "vacant slot kept a root vnode");
        slot.client = Some(client);
        slot.pid = pid;
        let handle = ProviderHandle {
            index,
            generation: slot.generation,
        };
        debug!(index, pid = pid.as_raw(), "provider client registered");
        Ok(handle)
    }

    /// Resolves `root_path` and installs it as the provider's
    /// virtualization root, transferring the vnode use-count into the
    /// slot on success.
    ///
    /// # Errors
    ///
    /// - [`HookError::PathTooLong`] if the path exceeds the slot buffer.
    /// - [`HookError::Lookup`] with the resolver's error.
    /// - [`HookError::NotADirectory`] if the path is not a directory.
    /// - [`HookError::StaleHandle`] if the slot was recycled.
    /// - [`HookError::RootBusy`] if the slot already has a root, or
    ///   another occupied slot already claims this root vnode.
    pub fn register_root(&self, handle: ProviderHandle, root_path: &str) -> Result<(), HookError> {
        if root_path.len() > self.max_path_bytes {
            return Err(HookError::PathTooLong {
                len: root_path.len(),
                max: self.max_path_bytes,
            });
        }

        // Resolve before taking the mutex; lookup may sleep.
        let vnode = self
            .fs
            .lookup(root_path)
            .map_err(|errno| HookError::Lookup { errno })?;
        if !self.fs.is_directory(&vnode) {
            return Err(HookError::NotADirectory {
                path: root_path.to_owned(),
            });
        }

        let mut slots = self.slots.lock();
        // No two occupied slots may share a root vnode; the ancestor
        // walk would otherwise resolve the same root to either provider.
        if slots
            .iter()
            .any(|other| other.client.is_some() && other.root_vnode.as_ref() == Some(&vnode))
        {
            return Err(HookError::RootBusy);
        }
        let slot = Self::slot_mut(&mut slots, handle)?;
        if slot.root_vnode.is_some() {
            return Err(HookError::RootBusy);
        }
        slot.root_vnode = Some(vnode);
        slot.root_path = root_path.to_owned();
        debug!(
            index = handle.index,
            root = root_path,
            "virtualization root registered"
        );
        Ok(())
    }

    /// Vacates the provider's slot: releases the root vnode's use-count,
    /// drops the registry's client reference, wipes the path, and bumps
    /// the generation so outstanding handles go stale.
    ///
    /// The client's own reference count is the caller's concern.
    ///
    /// # Errors
    ///
    /// Returns [`HookError::StaleHandle`] if the slot was already
    /// recycled.
    pub fn disconnect(&self, handle: ProviderHandle) -> Result<(), HookError> {
        let (root, client) = {
            let mut slots = self.slots.lock();
            let slot = Self::slot_mut(&mut slots, handle)?;
            let root = slot.root_vnode.take();
            let client = slot.client.take();
            slot.root_path.clear();
            slot.pid = Pid::from_raw(0);
            slot.generation += 1;
            (root, client)
        };
        // Use-count release and client drop happen outside the mutex.
        drop(root);
        drop(client);
        debug!(index = handle.index, "provider disconnected");
        Ok(())
    }

    /// Finds the closest enclosing virtualization root by walking from
    /// `vnode` toward the mount root.
    ///
    /// The walk holds one vnode use-count at a time and re-locks the
    /// registry for each ancestor's slot scan, so the mutex is never
    /// held across a parent fetch. Terminates after at most
    /// depth(vnode)+1 iterations.
    #[must_use]
    pub fn find(&self, vnode: &F::Vnode) -> Option<ProviderSnapshot> {
        let mut current = vnode.clone();
        loop {
            if self.fs.is_mount_root(&current) {
                return None;
            }
            {
                let slots = self.slots.lock();
                for (index, slot) in slots.iter().enumerate() {
                    let (Some(client), Some(root)) = (&slot.client, &slot.root_vnode) else {
                        continue;
                    };
                    if *root == current {
                        return Some(ProviderSnapshot {
                            handle: ProviderHandle {
                                index,
                                generation: slot.generation,
                            },
                            pid: slot.pid,
                            root_path: slot.root_path.clone(),
                            client: Arc::clone(client),
                        });
                    }
                }
            }
            current = self.fs.parent(&current)?;
        }
    }

    /// Serializes `message` and hands it to the slot's client.
    ///
    /// The client reference is snapshotted under the mutex and the
    /// transport is invoked with the mutex released; the transport may
    /// block indefinitely.
    ///
    /// # Errors
    ///
    /// Returns [`HookError::Io`] with `EIO` when the slot's client has
    /// been cleared (or the handle is stale), with the transport's error
    /// when the send itself fails, or a wire error if the message cannot
    /// be encoded.
    pub fn send_message(
        &self,
        handle: ProviderHandle,
        message: &KernelMessage,
    ) -> Result<(), HookError> {
        let client = {
            let slots = self.slots.lock();
            slots
                .get(handle.index)
                .filter(|slot| slot.generation == handle.generation)
                .and_then(|slot| slot.client.clone())
                .ok_or(HookError::Io { errno: Errno::EIO })?
        };

        let bytes = message.encode()?;
        client
            .send(&bytes)
            .map_err(|errno| HookError::Io { errno })
    }

    /// Handles of every occupied slot, for teardown sweeps.
    #[must_use]
    pub fn occupied_handles(&self) -> Vec<ProviderHandle> {
        self.slots
            .lock()
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.client.is_some())
            .map(|(index, slot)| ProviderHandle {
                index,
                generation: slot.generation,
            })
            .collect()
    }

    fn slot_mut<'s>(
        slots: &'s mut [Slot<F::Vnode>],
        handle: ProviderHandle,
    ) -> Result<&'s mut Slot<F::Vnode>, HookError> {
        slots
            .get_mut(handle.index)
            .filter(|slot| slot.generation == handle.generation && slot.client.is_some())
            .ok_or(HookError::StaleHandle)
    }
}

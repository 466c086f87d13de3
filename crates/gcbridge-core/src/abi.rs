//! The managed collector's C callback ABI.
//!
//! The collector is handed a [`RawGcBridgeCallbacks`] table once at startup
//! and calls back with pointers it owns. Class and object pointers become
//! [`ClassId`] and [`ManagedObject`] by address.
use crate::{
    bridge::BridgeCallbacks,
    classify::BridgeObjectKind,
    cross_refs::{CrossComponentEdge, StronglyConnectedComponent},
    error::BridgeError,
};
use gcbridge_utils::{ClassId, ManagedObject, sync::OnceLock};
use std::{
    ffi::{c_int, c_void},
    ptr, slice,
};

pub const BRIDGE_VERSION: c_int = 5;

/// One component as laid out by the collector: a header followed by
/// `num_objs` object pointers.
#[repr(C)]
pub struct RawScc {
    pub is_alive: c_int,
    pub num_objs: c_int,
    pub objs: [*mut c_void; 0],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawXref {
    pub src_scc_index: c_int,
    pub dst_scc_index: c_int,
}

pub type BridgeClassKindFn = unsafe extern "C" fn(class: *mut c_void) -> c_int;
pub type IsBridgeObjectFn = unsafe extern "C" fn(obj: *mut c_void) -> c_int;
pub type CrossReferencesFn = unsafe extern "C" fn(
    num_sccs: c_int,
    sccs: *mut *mut RawScc,
    num_xrefs: c_int,
    xrefs: *mut RawXref,
);

#[repr(C)]
#[derive(Clone, Copy)]
pub struct RawGcBridgeCallbacks {
    pub bridge_version: c_int,
    pub bridge_class_kind: BridgeClassKindFn,
    pub is_bridge_object: IsBridgeObjectFn,
    pub cross_references: CrossReferencesFn,
}

static INSTALLED: OnceLock<&'static (dyn BridgeCallbacks + Send + Sync)> = OnceLock::new();

/// Install `callbacks` as the process-wide bridge and return the table to
/// register with the collector. Only one bridge can ever be installed.
pub fn install(
    callbacks: &'static (dyn BridgeCallbacks + Send + Sync),
) -> Result<RawGcBridgeCallbacks, BridgeError> {
    INSTALLED
        .set(callbacks)
        .map_err(|_| BridgeError::AlreadyInstalled)?;
    Ok(callback_table())
}

pub fn callback_table() -> RawGcBridgeCallbacks {
    RawGcBridgeCallbacks {
        bridge_version: BRIDGE_VERSION,
        bridge_class_kind: gc_bridge_class_kind,
        is_bridge_object: gc_is_bridge_object,
        cross_references: gc_cross_references,
    }
}

pub fn is_installed() -> bool {
    INSTALLED.get().is_some()
}

unsafe extern "C" fn gc_bridge_class_kind(class: *mut c_void) -> c_int {
    match INSTALLED.get() {
        Some(callbacks) => raw_bridge_class_kind(*callbacks, class),
        None => BridgeObjectKind::Transparent as c_int,
    }
}

unsafe extern "C" fn gc_is_bridge_object(obj: *mut c_void) -> c_int {
    match INSTALLED.get() {
        Some(callbacks) => raw_is_bridge_object(*callbacks, obj),
        None => 0,
    }
}

unsafe extern "C" fn gc_cross_references(
    num_sccs: c_int,
    sccs: *mut *mut RawScc,
    num_xrefs: c_int,
    xrefs: *mut RawXref,
) {
    if let Some(callbacks) = INSTALLED.get() {
        // SAFETY: the collector passes arrays of the advertised lengths.
        unsafe { raw_cross_references(*callbacks, num_sccs, sccs, num_xrefs, xrefs) }
    }
}

pub fn raw_bridge_class_kind(callbacks: &dyn BridgeCallbacks, class: *mut c_void) -> c_int {
    callbacks.bridge_class_kind(ClassId(class as usize)) as c_int
}

pub fn raw_is_bridge_object(callbacks: &dyn BridgeCallbacks, obj: *mut c_void) -> c_int {
    callbacks.is_bridge_object(ManagedObject(obj as usize)) as c_int
}

/// Decode the collector's arrays, run the pass and write each component's
/// liveness back.
///
/// # Safety
///
/// `sccs` must point to `num_sccs` valid component pointers, each followed by
/// `num_objs` object pointers, and `xrefs` to `num_xrefs` edges. Both may be
/// null when their count is zero.
pub unsafe fn raw_cross_references(
    callbacks: &dyn BridgeCallbacks,
    num_sccs: c_int,
    sccs: *mut *mut RawScc,
    num_xrefs: c_int,
    xrefs: *mut RawXref,
) {
    let num_sccs = usize::try_from(num_sccs).unwrap_or(0);
    let num_xrefs = usize::try_from(num_xrefs).unwrap_or(0);

    let raw_sccs: &[*mut RawScc] = if num_sccs == 0 || sccs.is_null() {
        &[]
    } else {
        unsafe { slice::from_raw_parts(sccs, num_sccs) }
    };
    let raw_xrefs: &[RawXref] = if num_xrefs == 0 || xrefs.is_null() {
        &[]
    } else {
        unsafe { slice::from_raw_parts(xrefs, num_xrefs) }
    };

    let mut components: Vec<_> = raw_sccs
        .iter()
        .map(|&raw| {
            let len = usize::try_from(unsafe { (*raw).num_objs }).unwrap_or(0);
            let first = unsafe { ptr::addr_of!((*raw).objs) }.cast::<*mut c_void>();
            let objs = unsafe { slice::from_raw_parts(first, len) };
            StronglyConnectedComponent::new(
                objs.iter().map(|&o| ManagedObject(o as usize)).collect(),
            )
        })
        .collect();

    let edges: Vec<_> = raw_xrefs
        .iter()
        .filter_map(|x| {
            let src = usize::try_from(x.src_scc_index).ok()?;
            let dst = usize::try_from(x.dst_scc_index).ok()?;
            if src >= num_sccs || dst >= num_sccs {
                tracing::warn!(target: "gcbridge::gc", "ignoring out of range xref {} -> {}", src, dst);
                return None;
            }
            Some(CrossComponentEdge::new(src, dst))
        })
        .collect();

    callbacks.cross_references(&mut components, &edges);

    for (&raw, scc) in raw_sccs.iter().zip(&components) {
        unsafe { (*raw).is_alive = scc.is_alive as c_int };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gcbridge_utils::sync::Mutex;

    #[repr(C)]
    struct FixedScc<const N: usize> {
        is_alive: c_int,
        num_objs: c_int,
        objs: [*mut c_void; N],
    }

    impl<const N: usize> FixedScc<N> {
        fn new(objs: [usize; N]) -> Self {
            Self {
                is_alive: 0,
                num_objs: N as c_int,
                objs: objs.map(|o| o as *mut c_void),
            }
        }

        fn as_raw(&mut self) -> *mut RawScc {
            (self as *mut Self).cast()
        }
    }

    /// Marks a component alive when any of its objects is odd.
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(Vec<usize>, Vec<(usize, usize)>)>>,
    }

    impl BridgeCallbacks for Recorder {
        fn bridge_class_kind(&self, class: ClassId) -> BridgeObjectKind {
            if class.0 == 0x10 {
                BridgeObjectKind::TransparentBridge
            } else {
                BridgeObjectKind::Transparent
            }
        }

        fn is_bridge_object(&self, obj: ManagedObject) -> bool {
            obj.0 == 0x20
        }

        fn cross_references(
            &self,
            sccs: &mut [StronglyConnectedComponent],
            edges: &[CrossComponentEdge],
        ) {
            for scc in sccs.iter_mut() {
                scc.is_alive = scc.objects.iter().any(|o| o.0 % 2 == 1);
                self.seen.lock().push((
                    scc.objects.iter().map(|o| o.0).collect(),
                    edges.iter().map(|e| (e.src, e.dst)).collect(),
                ));
            }
        }
    }

    #[test]
    fn test_kind_and_object_trampolines() {
        let recorder = Recorder::default();
        assert_eq!(raw_bridge_class_kind(&recorder, 0x10 as *mut c_void), 2);
        assert_eq!(raw_bridge_class_kind(&recorder, 0x11 as *mut c_void), 0);
        assert_eq!(raw_is_bridge_object(&recorder, 0x20 as *mut c_void), 1);
        assert_eq!(raw_is_bridge_object(&recorder, 0x21 as *mut c_void), 0);
    }

    #[test]
    fn test_cross_references_decodes_and_writes_back() {
        let recorder = Recorder::default();
        let mut pair = FixedScc::new([0x100, 0x201]);
        let mut empty = FixedScc::<0>::new([]);
        let mut single = FixedScc::new([0x300]);
        let mut sccs = [pair.as_raw(), empty.as_raw(), single.as_raw()];
        let mut xrefs = [
            RawXref {
                src_scc_index: 1,
                dst_scc_index: 0,
            },
            RawXref {
                src_scc_index: 2,
                dst_scc_index: 7,
            },
        ];

        unsafe {
            raw_cross_references(
                &recorder,
                sccs.len() as c_int,
                sccs.as_mut_ptr(),
                xrefs.len() as c_int,
                xrefs.as_mut_ptr(),
            );
        }

        assert_eq!(pair.is_alive, 1);
        assert_eq!(empty.is_alive, 0);
        assert_eq!(single.is_alive, 0);

        let seen = recorder.seen.lock();
        assert_eq!(seen[0].0, vec![0x100, 0x201]);
        assert!(seen[1].0.is_empty());
        // The out of range edge is dropped.
        assert_eq!(seen[0].1, vec![(1, 0)]);
    }

    #[test]
    fn test_null_arrays_are_empty() {
        let recorder = Recorder::default();
        unsafe {
            raw_cross_references(&recorder, 0, ptr::null_mut(), 0, ptr::null_mut());
        }
        assert!(recorder.seen.lock().is_empty());
    }

    #[test]
    fn test_install_once() {
        static RECORDER: OnceLock<Recorder> = OnceLock::new();
        let recorder = RECORDER.get_or_init(Recorder::default);

        let table = install(recorder).unwrap();
        assert_eq!(table.bridge_version, BRIDGE_VERSION);
        assert!(is_installed());
        assert_eq!(install(recorder).err(), Some(BridgeError::AlreadyInstalled));

        let kind = unsafe { (table.bridge_class_kind)(0x10 as *mut c_void) };
        assert_eq!(kind, BridgeObjectKind::TransparentBridge as c_int);
    }
}

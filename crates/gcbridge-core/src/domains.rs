//! Live managed domains and their "bridge processing" signal.
use crate::{error::RegistryError, managed::ManagedRuntime};
use gcbridge_utils::{DomainId, FieldId, sync::Mutex};

pub const SIGNAL_ASSEMBLY: &str = "Mono.Android";
pub const SIGNAL_NAMESPACE: &str = "Android.Runtime";
pub const SIGNAL_CLASS: &str = "JNIEnv";
pub const SIGNAL_FIELD: &str = "BridgeProcessing";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainRegistration {
    pub domain: DomainId,
    /// Static boolean field set while a bridge pass runs.
    pub signal: FieldId,
}

/// Process-wide list of live domains.
///
/// Registration may race with a bridge pass, so the list is locked; a pass
/// signals the domains registered at the moment it takes the lock.
#[derive(Debug, Default)]
pub struct DomainRegistry {
    domains: Mutex<Vec<DomainRegistration>>,
}

impl DomainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        managed: &dyn ManagedRuntime,
        domain: DomainId,
    ) -> Result<DomainRegistration, RegistryError> {
        let class = managed
            .find_class(domain, SIGNAL_ASSEMBLY, SIGNAL_NAMESPACE, SIGNAL_CLASS)
            .ok_or_else(|| RegistryError::TypeNotFound {
                assembly: SIGNAL_ASSEMBLY.to_string(),
                namespace: SIGNAL_NAMESPACE.to_string(),
                name: SIGNAL_CLASS.to_string(),
            })?;
        let signal =
            managed
                .find_field(class, SIGNAL_FIELD)
                .ok_or_else(|| RegistryError::FieldNotFound {
                    type_name: format!("{}.{}", SIGNAL_NAMESPACE, SIGNAL_CLASS),
                    field: SIGNAL_FIELD.to_string(),
                })?;

        let registration = DomainRegistration { domain, signal };
        let mut domains = self.domains.lock();
        domains.retain(|d| d.domain != domain);
        domains.push(registration);
        tracing::debug!(target: "gcbridge::gc", "registered {}", domain);
        Ok(registration)
    }

    /// Returns whether `domain` was registered.
    pub fn unregister(&self, domain: DomainId) -> bool {
        let mut domains = self.domains.lock();
        let before = domains.len();
        domains.retain(|d| d.domain != domain);
        before != domains.len()
    }

    pub fn contains(&self, domain: DomainId) -> bool {
        self.domains.lock().iter().any(|d| d.domain == domain)
    }

    /// Earliest registered domain still live.
    pub fn first(&self) -> Option<DomainId> {
        self.domains.lock().first().map(|d| d.domain)
    }

    pub fn len(&self) -> usize {
        self.domains.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.lock().is_empty()
    }

    /// Write `value` into every registered domain's signal field.
    pub fn set_signal(&self, managed: &dyn ManagedRuntime, value: bool) {
        for d in self.domains.lock().iter() {
            managed.set_static_field(d.domain, d.signal, value as usize);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::TinyRuntime;

    #[test]
    fn test_register_and_signal() {
        let rt = TinyRuntime::with_bridge_types();
        let domains = DomainRegistry::new();
        let first = domains.register(&rt, DomainId(1)).unwrap();
        domains.register(&rt, DomainId(2)).unwrap();
        // Registering twice does not duplicate the entry.
        domains.register(&rt, DomainId(2)).unwrap();
        assert_eq!(domains.len(), 2);
        assert_eq!(domains.first(), Some(DomainId(1)));

        domains.set_signal(&rt, true);
        domains.set_signal(&rt, false);
        let statics = rt.statics.lock().clone();
        assert_eq!(
            statics,
            vec![
                (DomainId(1), first.signal, 1),
                (DomainId(2), first.signal, 1),
                (DomainId(1), first.signal, 0),
                (DomainId(2), first.signal, 0),
            ]
        );

        assert!(domains.unregister(DomainId(1)));
        assert_eq!(domains.first(), Some(DomainId(2)));
        assert!(!domains.unregister(DomainId(1)));
        assert!(!domains.contains(DomainId(1)));
        assert!(domains.contains(DomainId(2)));
    }

    #[test]
    fn test_missing_signal_class() {
        let rt = TinyRuntime::default();
        let domains = DomainRegistry::new();
        assert!(matches!(
            domains.register(&rt, DomainId(1)),
            Err(RegistryError::TypeNotFound { .. })
        ));
        assert!(domains.is_empty());
    }
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The table of PCI device types that can be instantiated.

use pci_core::DeviceTypeDescriptor;
use pci_core::PciFunction;
use std::collections::BTreeMap;
use thiserror::Error;

/// Error returned by [`DeviceTypeRegistry::try_register`].
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A type with the same name was registered before.
    #[error("pci device type {0:?} is already registered")]
    Duplicate(&'static str),
}

/// Error returned by [`DeviceTypeRegistry::instantiate_standalone`].
#[derive(Debug, Error)]
pub enum InstantiateError {
    /// No type with the given name is registered.
    #[error("unknown pci device type {0:?}")]
    UnknownType(String),
    /// The type can only be created as part of the chipset that contains it.
    #[error("pci device type {0:?} cannot be created standalone")]
    NotUserCreatable(&'static str),
}

/// Device types keyed by their unique type name.
///
/// Populated once during startup, before any bus is assembled.
#[derive(Debug, Default)]
pub struct DeviceTypeRegistry {
    types: BTreeMap<&'static str, &'static DeviceTypeDescriptor>,
}

impl DeviceTypeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a device type.
    ///
    /// Panics if a type with the same name is already registered. Use
    /// [`Self::try_register`] to handle that case.
    #[track_caller]
    pub fn register(&mut self, descriptor: &'static DeviceTypeDescriptor) {
        if let Err(err) = self.try_register(descriptor) {
            panic!("{err}");
        }
    }

    /// Registers a device type, failing if the name is already taken.
    pub fn try_register(
        &mut self,
        descriptor: &'static DeviceTypeDescriptor,
    ) -> Result<(), RegistryError> {
        let name = descriptor.info.name;
        if self.types.contains_key(name) {
            return Err(RegistryError::Duplicate(name));
        }
        tracing::debug!(
            name,
            description = descriptor.info.description,
            user_creatable = descriptor.info.user_creatable,
            "registered pci device type"
        );
        self.types.insert(name, descriptor);
        Ok(())
    }

    /// Looks up a type by name.
    pub fn get(&self, name: &str) -> Option<&'static DeviceTypeDescriptor> {
        self.types.get(name).copied()
    }

    /// Iterates over the registered types in name order.
    pub fn iter(&self) -> impl Iterator<Item = &'static DeviceTypeDescriptor> + '_ {
        self.types.values().copied()
    }

    /// Creates an initialized function of the named type outside of any
    /// chipset assembly, e.g. for a user-requested device.
    ///
    /// Fails for types that are not user creatable.
    pub fn instantiate_standalone(
        &self,
        name: &str,
    ) -> Result<Box<dyn PciFunction>, InstantiateError> {
        let descriptor = self
            .get(name)
            .ok_or_else(|| InstantiateError::UnknownType(name.to_owned()))?;
        if !descriptor.info.user_creatable {
            tracing::warn!(name, "refusing standalone creation of chipset device");
            return Err(InstantiateError::NotUserCreatable(descriptor.info.name));
        }
        let mut function = (descriptor.instantiate)();
        function.initialize();
        Ok(function)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::TEST_INFO;
    use crate::test_helpers::TEST_TYPE;
    use crate::test_helpers::new_scratch;
    use pci_core::DeviceTypeInfo;

    static CHIPSET_ONLY: DeviceTypeDescriptor = DeviceTypeDescriptor {
        info: DeviceTypeInfo {
            name: "chipset-only",
            user_creatable: false,
            ..TEST_INFO
        },
        instantiate: new_scratch,
    };

    #[test_with_tracing::test]
    fn register_and_lookup() {
        let mut registry = DeviceTypeRegistry::new();
        registry.register(&TEST_TYPE);
        registry.register(&CHIPSET_ONLY);

        assert_eq!(registry.get("test-function").unwrap().info.name, "test-function");
        assert!(registry.get("nope").is_none());
        let names: Vec<_> = registry.iter().map(|d| d.info.name).collect();
        assert_eq!(names, ["chipset-only", "test-function"]);
    }

    #[test_with_tracing::test]
    fn try_register_duplicate() {
        let mut registry = DeviceTypeRegistry::new();
        registry.try_register(&TEST_TYPE).unwrap();
        assert!(matches!(
            registry.try_register(&TEST_TYPE),
            Err(RegistryError::Duplicate("test-function"))
        ));
    }

    #[test_with_tracing::test]
    #[should_panic(expected = "already registered")]
    fn register_duplicate_panics() {
        let mut registry = DeviceTypeRegistry::new();
        registry.register(&TEST_TYPE);
        registry.register(&TEST_TYPE);
    }

    #[test_with_tracing::test]
    fn standalone_instantiation() {
        let mut registry = DeviceTypeRegistry::new();
        registry.register(&TEST_TYPE);
        registry.register(&CHIPSET_ONLY);

        let function = registry.instantiate_standalone("test-function").unwrap();
        assert_eq!(function.metadata().name, "test-function");

        assert!(matches!(
            registry.instantiate_standalone("chipset-only"),
            Err(InstantiateError::NotUserCreatable("chipset-only"))
        ));
        assert!(matches!(
            registry.instantiate_standalone("nope"),
            Err(InstantiateError::UnknownType(_))
        ));
    }
}

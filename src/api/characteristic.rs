use bitflags::bitflags;
use uuid::Uuid;

use crate::api::central::PeripheralId;
use crate::{Error, ErrorType, Result};

bitflags! {
    /// Operations a characteristic supports. Values match the GATT
    /// characteristic properties field (and `CBCharacteristicProperties`).
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
    pub struct CharacteristicProperties: u16 {
        const BROADCAST = 0x01;
        const READ = 0x02;
        const WRITE_WITHOUT_RESPONSE = 0x04;
        const WRITE = 0x08;
        const NOTIFY = 0x10;
        const INDICATE = 0x20;
        const AUTHENTICATED_SIGNED_WRITES = 0x40;
        const EXTENDED_PROPERTIES = 0x80;
        const NOTIFY_ENCRYPTION_REQUIRED = 0x100;
        const INDICATE_ENCRYPTION_REQUIRED = 0x200;
    }
}

impl CharacteristicProperties {
    pub fn can_subscribe(self) -> bool {
        self.intersects(Self::NOTIFY | Self::INDICATE)
    }

    pub fn supports(self, write_type: CharacteristicWriteType) -> bool {
        match write_type {
            CharacteristicWriteType::WriteWithResponse => self.contains(Self::WRITE),
            CharacteristicWriteType::WriteWithoutResponse => {
                self.contains(Self::WRITE_WITHOUT_RESPONSE)
            }
        }
    }
}

bitflags! {
    /// Access control on a locally published characteristic.
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
    pub struct AttributePermissions: u8 {
        const READABLE = 0x01;
        const WRITEABLE = 0x02;
        const READ_ENCRYPTION_REQUIRED = 0x04;
        const WRITE_ENCRYPTION_REQUIRED = 0x08;
    }
}

impl AttributePermissions {
    pub fn allows_read(self) -> bool {
        self.intersects(Self::READABLE | Self::READ_ENCRYPTION_REQUIRED)
    }

    pub fn allows_write(self) -> bool {
        self.intersects(Self::WRITEABLE | Self::WRITE_ENCRYPTION_REQUIRED)
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum CharacteristicWriteType {
    WriteWithoutResponse,
    WriteWithResponse,
}

/// Identity of a remote characteristic: its UUID scoped to the owning service
/// and peripheral. Client side events are keyed by it.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct CharacteristicId {
    pub peripheral: PeripheralId,
    pub service: Uuid,
    pub characteristic: Uuid,
}

/// Snapshot of a characteristic discovered on a remote peripheral.
///
/// The value and the notifying flag only change inside the backend, in
/// response to read results, notifications and acknowledged `set_notify`
/// requests. Re-read the owning peripheral's services for fresh state.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Characteristic {
    id: CharacteristicId,
    properties: CharacteristicProperties,
    value: Option<Vec<u8>>,
    is_notifying: bool,
}

impl Characteristic {
    pub fn new(
        peripheral: PeripheralId,
        service: Uuid,
        uuid: Uuid,
        properties: CharacteristicProperties,
    ) -> Self {
        Characteristic {
            id: CharacteristicId {
                peripheral,
                service,
                characteristic: uuid,
            },
            properties,
            value: None,
            is_notifying: false,
        }
    }

    pub fn id(&self) -> &CharacteristicId {
        &self.id
    }

    pub fn uuid(&self) -> Uuid {
        self.id.characteristic
    }

    pub fn service_uuid(&self) -> Uuid {
        self.id.service
    }

    pub fn peripheral_id(&self) -> &PeripheralId {
        &self.id.peripheral
    }

    pub fn properties(&self) -> CharacteristicProperties {
        self.properties
    }

    pub fn value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }

    pub fn is_notifying(&self) -> bool {
        self.is_notifying
    }

    pub(crate) fn set_value(&mut self, value: Option<Vec<u8>>) {
        self.value = value;
    }

    pub(crate) fn set_notifying(&mut self, is_notifying: bool) {
        self.is_notifying = is_notifying;
    }

    /// Keeps the cached value and the acknowledged notifying flag of the
    /// same characteristic from an earlier discovery.
    pub(crate) fn carry_state_from(&mut self, previous: &Characteristic) {
        self.value = previous.value.clone();
        self.is_notifying = previous.is_notifying;
    }
}

/// A characteristic authored locally for publication by a peripheral manager.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MutableCharacteristic {
    uuid: Uuid,
    service: Option<Uuid>,
    properties: CharacteristicProperties,
    permissions: AttributePermissions,
    value: Option<Vec<u8>>,
}

impl MutableCharacteristic {
    /// A characteristic whose value is supplied on demand through read
    /// requests.
    pub fn new(
        uuid: Uuid,
        properties: CharacteristicProperties,
        permissions: AttributePermissions,
    ) -> Self {
        MutableCharacteristic {
            uuid,
            service: None,
            properties,
            permissions,
            value: None,
        }
    }

    /// A characteristic with a static value answered by the driver itself.
    /// Only read-only characteristics may carry one.
    pub fn with_static_value(
        uuid: Uuid,
        properties: CharacteristicProperties,
        permissions: AttributePermissions,
        value: Vec<u8>,
    ) -> Result<Self> {
        let writable = CharacteristicProperties::WRITE
            | CharacteristicProperties::WRITE_WITHOUT_RESPONSE
            | CharacteristicProperties::NOTIFY
            | CharacteristicProperties::INDICATE;
        if properties.intersects(writable) || permissions.allows_write() {
            return Err(Error::from_string(
                format!("characteristic {uuid} with a static value must be read-only"),
                ErrorType::ProtocolMisuse,
            ));
        }
        Ok(MutableCharacteristic {
            uuid,
            service: None,
            properties,
            permissions,
            value: Some(value),
        })
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// The service this characteristic was attached to, if any.
    pub fn service_uuid(&self) -> Option<Uuid> {
        self.service
    }

    pub(crate) fn set_service(&mut self, service: Uuid) {
        self.service = Some(service);
    }

    pub fn properties(&self) -> CharacteristicProperties {
        self.properties
    }

    pub fn permissions(&self) -> AttributePermissions {
        self.permissions
    }

    pub fn value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }
}

impl Default for MutableCharacteristic {
    fn default() -> Self {
        MutableCharacteristic::new(
            Uuid::nil(),
            CharacteristicProperties::READ
                | CharacteristicProperties::WRITE
                | CharacteristicProperties::NOTIFY,
            AttributePermissions::READABLE | AttributePermissions::WRITEABLE,
        )
    }
}

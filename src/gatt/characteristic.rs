use super::properties::{AttributePermission, CharacteristicProperty};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Characteristic {
    pub uuid: Uuid,
    pub properties: Vec<CharacteristicProperty>,
    pub permissions: Vec<AttributePermission>,
    pub value: Vec<u8>,
}

impl Characteristic {
    pub fn new(
        uuid: Uuid,
        properties: Vec<CharacteristicProperty>,
        permissions: Vec<AttributePermission>,
        value: Vec<u8>,
    ) -> Self {
        Characteristic {
            uuid,
            properties,
            permissions,
            value,
        }
    }

    /// Read + Notify characteristic with Read permission and a fixed value.
    pub fn static_readable(uuid: Uuid, value: impl Into<Vec<u8>>) -> Self {
        Characteristic::new(
            uuid,
            vec![CharacteristicProperty::Read, CharacteristicProperty::Notify],
            vec![AttributePermission::Readable],
            value.into(),
        )
    }

    pub fn has_property(&self, property: CharacteristicProperty) -> bool {
        self.properties.contains(&property)
    }

    pub fn property_mask(&self) -> u8 {
        CharacteristicProperty::mask(&self.properties)
    }

    pub fn is_readable(&self) -> bool {
        self.has_property(CharacteristicProperty::Read)
            && self.permissions.iter().any(|p| p.allows_read())
    }

    /// Value served for a read at `offset`, or `None` past the end.
    pub fn value_at(&self, offset: usize) -> Option<&[u8]> {
        self.value.get(offset..)
    }
}

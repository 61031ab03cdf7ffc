/// Characteristic properties, as declared in the attribute table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharacteristicProperty {
    Broadcast,
    Read,
    WriteWithoutResponse,
    Write,
    Notify,
    Indicate,
}

impl CharacteristicProperty {
    /// Bit in the characteristic declaration's properties field.
    pub fn bit(self) -> u8 {
        match self {
            CharacteristicProperty::Broadcast => 0x01,
            CharacteristicProperty::Read => 0x02,
            CharacteristicProperty::WriteWithoutResponse => 0x04,
            CharacteristicProperty::Write => 0x08,
            CharacteristicProperty::Notify => 0x10,
            CharacteristicProperty::Indicate => 0x20,
        }
    }

    pub fn mask(properties: &[CharacteristicProperty]) -> u8 {
        properties.iter().fold(0, |mask, p| mask | p.bit())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributePermission {
    Readable,
    Writeable,
    ReadEncryptionRequired,
    WriteEncryptionRequired,
}

impl AttributePermission {
    pub fn allows_read(self) -> bool {
        matches!(
            self,
            AttributePermission::Readable | AttributePermission::ReadEncryptionRequired
        )
    }
}

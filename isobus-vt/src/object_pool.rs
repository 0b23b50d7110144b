//! Object pools, modeled only to the depth the connection/upload handshake
//! needs. Rendering semantics (how a `WorkingSet` lays out child masks, how
//! a `SoftKeyMask` is drawn) are out of scope — an `ObjectPool` is nothing
//! more than an ordered list of opaque object records concatenated into one
//! upload payload.

/// The handful of object types the handshake itself cares about
/// distinguishing; everything else is carried opaquely via `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    WorkingSet,
    DataMask,
    AlarmMask,
    Container,
    SoftKeyMask,
    Key,
    Button,
    InputNumber,
    OutputNumber,
    InputString,
    OutputString,
    Other(u8),
}

impl ObjectType {
    fn to_byte(self) -> u8 {
        match self {
            Self::WorkingSet => 0,
            Self::DataMask => 1,
            Self::AlarmMask => 2,
            Self::Container => 3,
            Self::SoftKeyMask => 4,
            Self::Key => 5,
            Self::Button => 6,
            Self::InputNumber => 7,
            Self::OutputNumber => 8,
            Self::InputString => 9,
            Self::OutputString => 10,
            Self::Other(b) => b,
        }
    }

    fn from_byte(b: u8) -> Self {
        match b {
            0 => Self::WorkingSet,
            1 => Self::DataMask,
            2 => Self::AlarmMask,
            3 => Self::Container,
            4 => Self::SoftKeyMask,
            5 => Self::Key,
            6 => Self::Button,
            7 => Self::InputNumber,
            8 => Self::OutputNumber,
            9 => Self::InputString,
            10 => Self::OutputString,
            other => Self::Other(other),
        }
    }
}

/// One object pool record: an object ID, its type, and whatever
/// type-specific bytes it carries. This stack never interprets those bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VTObject {
    pub id: u16,
    pub kind: ObjectType,
    pub bytes: Vec<u8>,
}

impl Default for VTObject {
    fn default() -> Self {
        Self {
            id: 0,
            kind: ObjectType::WorkingSet,
            bytes: Vec::new(),
        }
    }
}

/// An ordered collection of objects to upload to a VT as a single logical
/// message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectPool {
    objects: Vec<VTObject>,
}

impl ObjectPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, object: VTObject) {
        self.objects.push(object);
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn objects(&self) -> &[VTObject] {
        &self.objects
    }

    /// Concatenate every object into the single payload `VTClient` uploads
    /// over TP/ETP: `id (2B LE) | kind (1B) | len (2B LE) | bytes`, repeated.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for obj in &self.objects {
            out.extend_from_slice(&obj.id.to_le_bytes());
            out.push(obj.kind.to_byte());
            out.extend_from_slice(&(obj.bytes.len() as u16).to_le_bytes());
            out.extend_from_slice(&obj.bytes);
        }
        out
    }

    /// Inverse of [`ObjectPool::to_bytes`], used by a VT server reassembling
    /// an uploaded pool.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut objects = Vec::new();
        let mut i = 0;
        while i + 5 <= data.len() {
            let id = u16::from_le_bytes([data[i], data[i + 1]]);
            let kind = ObjectType::from_byte(data[i + 2]);
            let len = u16::from_le_bytes([data[i + 3], data[i + 4]]) as usize;
            i += 5;
            let end = (i + len).min(data.len());
            objects.push(VTObject { id, kind, bytes: data[i..end].to_vec() });
            i = end;
        }
        Self { objects }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_pool_round_trips() {
        let pool = ObjectPool::new();
        assert!(ObjectPool::from_bytes(&pool.to_bytes()).is_empty());
    }

    #[test]
    fn pool_round_trips_through_bytes() {
        let mut pool = ObjectPool::new();
        pool.add(VTObject { id: 1, kind: ObjectType::WorkingSet, bytes: vec![] });
        pool.add(VTObject { id: 2, kind: ObjectType::DataMask, bytes: vec![0xAA, 0xBB] });

        let decoded = ObjectPool::from_bytes(&pool.to_bytes());
        assert_eq!(decoded, pool);
    }
}

pub mod record;
pub mod reference;
pub mod varint;

pub use self::record::{BaseValues, Changed, Encoded, KeySet, RecordPayload, VersionDecoder, VersionEncoder, VersionRecord};
pub use self::reference::{ExternalOnly, Member, ReferenceResolver, ResolvedRef};

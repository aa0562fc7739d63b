use {
    std::{
        hash::{
            Hash,
            Hasher,
        },
        marker::PhantomData,
        num::ParseIntError,
    },
    rand::Rng as _,
    serde::{
        Deserializer,
        Serializer,
    },
    sqlx::{
        Decode,
        Encode,
        encode::IsNull,
        error::BoxDynError,
        postgres::{
            PgArgumentBuffer,
            PgHasArrayType,
            PgTypeInfo,
            PgValueRef,
        },
    },
    crate::prelude::*,
};

/// A kind of record that can be referred to by an [`Id`].
pub(crate) trait Table {
    /// Used in error messages, e.g. “no fixture with ID 123”.
    const KIND: &'static str;
}

pub(crate) enum Fixtures {}
pub(crate) enum Leagues {}
pub(crate) enum Runs {}
pub(crate) enum RunningSessions {}
pub(crate) enum Submissions {}
pub(crate) enum Users {}

impl Table for Fixtures { const KIND: &'static str = "fixture"; }
impl Table for Leagues { const KIND: &'static str = "league"; }
impl Table for Runs { const KIND: &'static str = "run"; }
impl Table for RunningSessions { const KIND: &'static str = "running session"; }
impl Table for Submissions { const KIND: &'static str = "result submission"; }
impl Table for Users { const KIND: &'static str = "user"; }

/// A random positive 63-bit record identifier, stored as `BIGINT`.
pub(crate) struct Id<T: Table> {
    inner: u64,
    _table: PhantomData<T>,
}

impl<T: Table> Id<T> {
    pub(crate) fn new() -> Self {
        Self::from(rand::rng().random_range(1..=i64::MAX as u64))
    }

    pub(crate) fn get(&self) -> u64 {
        self.inner
    }
}

impl<T: Table> From<u64> for Id<T> {
    fn from(inner: u64) -> Self {
        Self { inner, _table: PhantomData }
    }
}

impl<T: Table> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: Table> Copy for Id<T> {}

impl<T: Table> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}

impl<T: Table> Eq for Id<T> {}

impl<T: Table> PartialOrd for Id<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: Table> Ord for Id<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.inner.cmp(&other.inner)
    }
}

impl<T: Table> Hash for Id<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.hash(state);
    }
}

impl<T: Table> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id<{}>({})", T::KIND, self.inner)
    }
}

impl<T: Table> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}

impl<T: Table> FromStr for Id<T> {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, ParseIntError> {
        s.parse::<u64>().map(Self::from)
    }
}

impl<T: Table> Serialize for Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.inner.serialize(serializer)
    }
}

impl<'de, T: Table> Deserialize<'de> for Id<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        u64::deserialize(deserializer).map(Self::from)
    }
}

impl<'r, T: Table> Decode<'r, Postgres> for Id<T> {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let id = <i64 as Decode<Postgres>>::decode(value)?;
        Ok(Self::from(u64::try_from(id)?))
    }
}

impl<'q, T: Table> Encode<'q, Postgres> for Id<T> {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        Encode::<Postgres>::encode_by_ref(&i64::try_from(self.inner)?, buf)
    }

    fn size_hint(&self) -> usize {
        Encode::<Postgres>::size_hint(&0_i64)
    }
}

impl<T: Table> sqlx::Type<Postgres> for Id<T> {
    fn type_info() -> PgTypeInfo {
        <i64 as sqlx::Type<Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        <i64 as sqlx::Type<Postgres>>::compatible(ty)
    }
}

impl<T: Table> PgHasArrayType for Id<T> {
    fn array_type_info() -> PgTypeInfo {
        <i64 as PgHasArrayType>::array_type_info()
    }
}

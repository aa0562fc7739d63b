pub(crate) use {
    std::{
        borrow::Cow,
        cmp::{
            Ordering::{
                self,
                *,
            },
            Reverse,
        },
        collections::{
            BTreeMap,
            HashMap,
            HashSet,
        },
        fmt,
        str::FromStr,
    },
    chrono::prelude::*,
    enum_iterator::Sequence,
    itertools::Itertools as _,
    serde::{
        Deserialize,
        Serialize,
    },
    sqlx::{
        PgPool,
        Postgres,
        Transaction,
    },
    crate::{
        error::Error,
        id::{
            Fixtures,
            Id,
            Leagues,
            Runs,
            RunningSessions,
            Submissions,
            Users,
        },
    },
};

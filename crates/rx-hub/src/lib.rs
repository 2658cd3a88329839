//! # rx-hub
//!
//! The hub archive: a directory holding the partitioned `events` tree, its
//! secondary index, the `meta/` dictionaries, the entry catalogue and any
//! friend shards.
//!
//! - [`ShardWriter`] / [`EventsTree`] write `events` partitions.
//! - [`FriendWriter`] writes per-dataset friend tables.
//! - [`HubCatalog`] owns `entries`, `entry_friends` and `hub_meta`.
//! - [`HubDataFrame`] reopens a hub and exposes selections as lazy [`rx_frame::Node`]s.
//! - [`link_friends`] rewrites friend fields of the catalogue.
//! - [`attach_scores`] turns an external score table into friend shards.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod archive;
pub mod catalog;
pub mod frame;
pub mod friend;
pub mod index;
pub mod linker;
pub mod meta;
pub mod provenance;
pub mod scores;
pub mod shard;

pub use archive::{HubLayout, WriteMode, sanitize};
pub use catalog::{HubCatalog, HubEntry, HubFriend, HubSummary, OpenMode};
pub use frame::{Combination, HubDataFrame, Selection};
pub use friend::{FriendConfig, FriendWriter};
pub use index::{EventIndex, build_event_index};
pub use linker::{FriendLinkOptions, LinkReport, link_friends};
pub use meta::{CutflowRow, ExposureRow, MetaContent, write_meta};
pub use provenance::{Interner, ProvenanceDicts};
pub use scores::{AttachReport, ScoreAttachOptions, attach_scores, parse_column_overrides};
pub use shard::{EventsTree, ShardConfig, ShardStats, ShardWriter};

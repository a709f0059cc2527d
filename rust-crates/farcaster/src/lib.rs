pub mod channel;
pub mod draw;
pub mod fid;
pub mod neynar;
pub mod users;

#[cfg(test)]
pub(crate) mod test_server;

pub use channel::{
    CancelFlag,
    ChannelFetcher,
    ChannelGroup,
    ChannelSource,
    FarcasterClient,
    FetchOutcome,
    Page,
};
pub use draw::draw_winner;
pub use fid::extract_fid;
pub use neynar::{
    FidLookup,
    NeynarClient,
};
pub use users::{
    AppUsersClient,
    UserLookup,
    UserProfile,
    resolve_winner,
};

pub mod dates;
pub mod fetcher;
pub mod opml;
pub mod parser;

pub use dates::parse_date;
pub use fetcher::{
    build_client, fetch_one, refresh_all, FetchError, RefreshOutcome, RefreshStatus,
};
pub use opml::{export_opml, export_to_file, import_from_file, parse_opml, OpmlError};
pub use parser::{parse_feed, ParseError};

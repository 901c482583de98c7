//! Phone Directory Record Protocol
//!
//! Wire format of the files the IP phones fetch. Two shapes share one layout:
//! an optional `Title`, an optional `Prompt`, then an ordered list of children.
//!
//! ```text
//! <CiscoIPPhoneMenu>                    <CiscoIPPhoneDirectory>
//!   <Title>Zona Este</Title>              <Title>Bavaro</Title>
//!   <MenuItem>                            <DirectoryEntry>
//!     <Name>Bavaro</Name>                   <Name>Caja 1 - Ana Perez</Name>
//!     <URL>http://.../bavaro.xml</URL>      <Telephone>2201</Telephone>
//!   </MenuItem>                           </DirectoryEntry>
//! </CiscoIPPhoneMenu>                   </CiscoIPPhoneDirectory>
//! ```
//!
//! The phones are picky about layout, so [`serialize`] always produces the
//! same bytes for the same document and [`parse`] accepts whatever older
//! tools wrote (declarations, BOMs, comments, single children, Latin-1).

pub mod codec;
pub mod document;
pub mod error;
pub mod links;

pub use codec::{escape_text, parse, serialize};
pub use document::{Directory, DirectoryEntry, Document, Menu, MenuItem, RecordChild};
pub use error::CodecError;
pub use links::{parse_link, LinkBuilder, LinkTarget};

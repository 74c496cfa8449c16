// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use data_encoding::{
    BASE32, BASE32_NOPAD, BASE32HEX, BASE32HEX_NOPAD, BASE64, BASE64_NOPAD, BASE64URL, BASE64URL_NOPAD, Encoding,
    HEXLOWER_PERMISSIVE,
};
use serde::{Deserialize, Serialize};

/// Text encodings for opaque identifiers.  The `Escaped`/`Raw` variants omit
/// padding so the result is safe in headers and URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IdEncoding {
    Base16,
    Base32,
    Base32Escaped,
    Base32Hex,
    #[default]
    Base32HexEscaped,
    Base64,
    Base64Raw,
    #[serde(rename = "Base64URL")]
    Base64Url,
    #[serde(rename = "Base64RawURL")]
    Base64RawUrl,
}

impl IdEncoding {
    fn encoding(&self) -> Encoding {
        match self {
            IdEncoding::Base16 => HEXLOWER_PERMISSIVE,
            IdEncoding::Base32 => BASE32,
            IdEncoding::Base32Escaped => BASE32_NOPAD,
            IdEncoding::Base32Hex => BASE32HEX,
            IdEncoding::Base32HexEscaped => BASE32HEX_NOPAD,
            IdEncoding::Base64 => BASE64,
            IdEncoding::Base64Raw => BASE64_NOPAD,
            IdEncoding::Base64Url => BASE64URL,
            IdEncoding::Base64RawUrl => BASE64URL_NOPAD,
        }
    }

    pub fn encode(&self, bytes: &[u8]) -> String {
        self.encoding().encode(bytes)
    }

    pub fn decode(&self, text: &str) -> Option<Vec<u8>> {
        self.encoding().decode(text.as_bytes()).ok()
    }
}

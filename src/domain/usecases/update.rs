//
// Copyright (c) 2024 shoebox authors
//
use crate::domain::entities::{Asset, AssetInput, Patch};
use crate::domain::repositories::{RecordRepository, SearchRepository};
use crate::domain::usecases::KeyedMutex;
use anyhow::Error;
use std::cmp;
use std::fmt;
use std::sync::Arc;

///
/// Update an existing asset with new values, merging with the current record,
/// storing the result in the data repository, and returning it.
///
pub struct UpdateAsset {
    records: Arc<dyn RecordRepository>,
    cache: Arc<dyn SearchRepository>,
    guards: Arc<KeyedMutex>,
}

impl UpdateAsset {
    pub fn new(
        records: Arc<dyn RecordRepository>,
        cache: Arc<dyn SearchRepository>,
        guards: Arc<KeyedMutex>,
    ) -> Self {
        Self {
            records,
            cache,
            guards,
        }
    }
}

impl super::UseCase<Asset, Params> for UpdateAsset {
    fn call(&self, params: Params) -> Result<Asset, Error> {
        let cell = self.guards.acquire(&params.key);
        let _token = cell.lock().unwrap();
        // fetch the existing record to merge with incoming values
        let mut asset = self.records.get_asset(&params.key)?;
        merge_asset_input(&mut asset, params.asset);
        self.records.put_asset(&asset)?;
        // cached search results may refer to the old field values
        self.cache.clear()?;
        Ok(asset)
    }
}

#[derive(Clone)]
pub struct Params {
    key: String,
    asset: AssetInput,
}

impl Params {
    pub fn new(key: String, asset: AssetInput) -> Self {
        Self { key, asset }
    }
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Params({:?})", self.key)
    }
}

impl cmp::PartialEq for Params {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl cmp::Eq for Params {}

/// Add the tag to the list unless it is already present, lowercasing along
/// the way. The first occurrence keeps its position.
fn push_unique_tag(tags: &mut Vec<String>, tag: &str) {
    let folded = tag.to_lowercase();
    if !folded.is_empty() && !tags.contains(&folded) {
        tags.push(folded);
    }
}

fn merge_asset_input(asset: &mut Asset, input: AssetInput) {
    if let Some(incoming) = input.tags {
        // incoming tags replace existing tags; an empty list clears them
        let mut tags: Vec<String> = Vec::with_capacity(incoming.len());
        for tag in incoming.iter() {
            push_unique_tag(&mut tags, tag);
        }
        asset.tags = tags;
    }
    // do not overwrite the filename with a blank value
    if let Some(filename) = input.filename {
        if !filename.is_empty() {
            asset.filename = filename;
        }
    }
    match input.location {
        Patch::Keep => (),
        Patch::Clear => asset.location = None,
        Patch::Set(ref input_loc) => {
            asset.location = super::apply_location_input(asset.location.take(), input_loc);
        }
    }
    // parse the caption to glean location and additional tags
    match input.caption {
        Patch::Keep => (),
        Patch::Clear => asset.caption = None,
        Patch::Set(caption) => {
            let results = caption::parse(&caption);
            asset.caption = Some(caption);
            for tag in results.tags.iter() {
                push_unique_tag(&mut asset.tags, tag);
            }
            // the caption location only fills in missing parts
            asset.location = super::merge_locations(asset.location.take(), results.location);
        }
    }
    match input.datetime {
        Patch::Keep => (),
        Patch::Clear => asset.user_date = None,
        Patch::Set(datetime) => asset.user_date = Some(datetime),
    }
    // do not overwrite the media type with a blank value
    if let Some(mt) = input.media_type {
        if !mt.is_empty() {
            asset.media_type = mt.to_lowercase();
        }
    }
}

pub mod caption {
    //!
    //! Extract `#tags` and an `@location` from free-form caption text.
    //!
    //! A tag runs from the `#` marker until whitespace or one of the
    //! punctuation delimiters. The location may be a single bare word or a
    //! quoted string, which in turn may carry the full `label; city, region`
    //! encoding. Only the first `@` marker is honored.
    //!

    use crate::domain::entities::Location;
    use std::iter::Peekable;
    use std::str::Chars;
    use std::str::FromStr;

    /// Tags and location gleaned from a caption.
    #[derive(Default)]
    pub struct Extracted {
        /// Tags in their original case, in the order first seen.
        pub tags: Vec<String>,
        /// The first location marked in the caption, if any.
        pub location: Option<Location>,
    }

    /// Walk the caption, collecting tags and the location as their markers
    /// appear. Everything between markers is ignored.
    pub fn parse(input: &str) -> Extracted {
        let mut results: Extracted = Default::default();
        let mut chars = input.chars().peekable();
        while let Some(marker) = chars.next() {
            if marker == '#' {
                let word = take_word(&mut chars);
                if !word.is_empty() && !results.tags.contains(&word) {
                    results.tags.push(word);
                }
            } else if marker == '@' {
                let text = if chars.peek() == Some(&'"') {
                    // consume up to the closing quote, or to the end of the
                    // caption if the author never closed it
                    chars.next();
                    let mut quoted = String::new();
                    for ch in chars.by_ref() {
                        if ch == '"' {
                            break;
                        }
                        quoted.push(ch);
                    }
                    quoted
                } else {
                    take_word(&mut chars)
                };
                // only the first location marker counts, the rest are ignored
                if results.location.is_none() && !text.is_empty() {
                    results.location = Location::from_str(&text).ok();
                }
            }
        }
        results
    }

    // Collect characters up to the next delimiter.
    fn take_word(chars: &mut Peekable<Chars<'_>>) -> String {
        let mut word = String::new();
        while let Some(ch) = chars.peek() {
            if is_delimiter(*ch) {
                break;
            }
            word.push(*ch);
            chars.next();
        }
        word
    }

    /// `is_delimiter` returns true if `ch` is a delimiter character.
    fn is_delimiter(ch: char) -> bool {
        ch.is_whitespace() || matches!(ch, '.' | ',' | ';' | ':' | '(' | ')' | '"')
    }

}

//
// Copyright (c) 2024 shoebox authors
//
use crate::domain::entities::{SearchResult, SortField, SortOrder};
use crate::domain::repositories::{RecordRepository, SearchRepository};
use anyhow::Error;
use log::info;
use query::Constraint;
use std::cmp;
use std::fmt;
use std::sync::Arc;

// Number of records requested from the data source per batch while scanning.
const SCAN_BATCH_SIZE: usize = 1024;

///
/// Use case to scan all assets in the database, matching against multiple
/// criteria with optional boolean operators and grouping.
///
pub struct ScanAssets {
    repo: Arc<dyn RecordRepository>,
    cache: Arc<dyn SearchRepository>,
}

impl ScanAssets {
    pub fn new(repo: Arc<dyn RecordRepository>, cache: Arc<dyn SearchRepository>) -> Self {
        Self { repo, cache }
    }
}

impl super::UseCase<Vec<SearchResult>, Params> for ScanAssets {
    fn call(&self, params: Params) -> Result<Vec<SearchResult>, Error> {
        use query::Predicate;
        let cons = parser::parse_query(&params.query)?;
        let mut results: Vec<SearchResult> = vec![];
        if matches!(cons, Constraint::Empty) {
            return Ok(results);
        }

        if let Some(cached) = self.cache.get(&params.query)? {
            results = cached;
        } else {
            // use a cursor to iterate all of the assets in batches
            let mut scan_count: usize = 0;
            let mut cursor: Option<String> = None;
            loop {
                let mut batch = self.repo.fetch_assets(cursor, SCAN_BATCH_SIZE)?;
                scan_count += batch.assets.len();
                for asset in batch.assets.into_iter() {
                    if cons.matches(&asset) {
                        results.push(SearchResult::new(&asset));
                    }
                }
                // stop when all records have been scanned
                cursor = batch.cursor.take();
                if cursor.is_none() {
                    break;
                }
            }
            info!(
                "scanned {} total assets, {} matching",
                scan_count,
                results.len()
            );
            self.cache.put(params.query, results.clone())?;
        }
        super::sort_results(&mut results, params.sort_field, params.sort_order);
        Ok(results)
    }
}

#[derive(Clone, Default)]
pub struct Params {
    pub query: String,
    pub sort_field: Option<SortField>,
    pub sort_order: Option<SortOrder>,
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Params(query: {})", self.query)
    }
}

impl cmp::PartialEq for Params {
    fn eq(&self, other: &Self) -> bool {
        self.query == other.query
    }
}

impl cmp::Eq for Params {}

pub mod query {
    use crate::domain::entities::Asset;
    use anyhow::{anyhow, Error};
    use chrono::{DateTime, NaiveDate, NaiveTime, ParseError, Utc};
    use std::str::FromStr;

    /// Determines if an asset matches certain criteria.
    pub trait Predicate: std::fmt::Debug {
        /// For a given asset, return `true` if the asset matches.
        fn matches(&self, asset: &Asset) -> bool;
    }

    /// Convert a keyword and its arguments into a predicate. The `pos` is
    /// the byte offset of the keyword within the original query, used to
    /// produce meaningful errors.
    pub fn build_predicate(atom: Vec<String>, pos: usize) -> Result<Box<dyn Predicate>, Error> {
        let keyword = atom.first().ok_or_else(|| anyhow!("missing keyword"))?;
        let arity = |n: usize| -> Result<&String, Error> {
            atom.get(n)
                .ok_or_else(|| anyhow!("{} requires an argument (offset {})", keyword, pos))
        };
        match keyword.as_str() {
            "after" => Ok(Box::new(AfterPredicate::new(arity(1)?)?)),
            "before" => Ok(Box::new(BeforePredicate::new(arity(1)?)?)),
            "is" => Ok(Box::new(TypePredicate::new(arity(1)?))),
            "format" => Ok(Box::new(SubtypePredicate::new(arity(1)?))),
            "filename" => Ok(Box::new(FilenamePredicate::new(arity(1)?))),
            "tag" => Ok(Box::new(TagPredicate::new(arity(1)?))),
            "loc" => match atom.len() {
                2 => Ok(Box::new(LocationPredicate::new(atom.get(1).unwrap()))),
                3 => {
                    let field = LocationField::from_str(atom.get(1).unwrap())?;
                    let value = atom.get(2).unwrap();
                    Ok(Box::new(LocationPredicate::with_field(field, value)))
                }
                _ => Err(anyhow!("loc: requires 1 or 2 arguments (offset {})", pos)),
            },
            _ => Err(anyhow!(
                "unsupported predicate: {} (offset {})",
                keyword,
                pos
            )),
        }
    }

    /// Embodies any type of constraint for filtering assets.
    #[derive(Debug)]
    pub enum Constraint {
        /// Matches if both sides also match.
        And(Box<dyn Predicate>, Box<dyn Predicate>),
        /// Matches if either side matches.
        Or(Box<dyn Predicate>, Box<dyn Predicate>),
        /// Matches only if child predicate does not match.
        Not(Box<dyn Predicate>),
        /// Matches if the given predicate function returns `true`.
        Lambda(Box<dyn Predicate>),
        /// An empty query that matches nothing.
        Empty,
    }

    impl Predicate for Constraint {
        fn matches(&self, asset: &Asset) -> bool {
            match self {
                Constraint::And(left, right) => left.matches(asset) && right.matches(asset),
                Constraint::Or(left, right) => left.matches(asset) || right.matches(asset),
                Constraint::Not(child) => !child.matches(asset),
                Constraint::Lambda(pred) => pred.matches(asset),
                Constraint::Empty => false,
            }
        }
    }

    /// Matches if the asset file name equals the literal value. Unlike the
    /// other predicates, the comparison is case-sensitive.
    #[derive(Debug)]
    pub struct FilenamePredicate(String);

    impl FilenamePredicate {
        pub fn new<S: Into<String>>(name: S) -> Self {
            Self(name.into())
        }
    }

    impl Predicate for FilenamePredicate {
        fn matches(&self, asset: &Asset) -> bool {
            self.0 == asset.filename
        }
    }

    /// Matches if the asset media type family (image, video, audio) matches
    /// the value.
    #[derive(Debug)]
    pub struct TypePredicate(String);

    impl TypePredicate {
        pub fn new<S: Into<String>>(type_: S) -> Self {
            Self(type_.into().to_lowercase())
        }
    }

    impl Predicate for TypePredicate {
        fn matches(&self, asset: &Asset) -> bool {
            if let Ok(mime) = asset.media_type.parse::<mime::Mime>() {
                mime.type_().eq(&self.0.as_str())
            } else {
                false
            }
        }
    }

    /// Matches if the asset media subtype matches the value.
    #[derive(Debug)]
    pub struct SubtypePredicate(String);

    impl SubtypePredicate {
        pub fn new<S: Into<String>>(subtype: S) -> Self {
            Self(subtype.into().to_lowercase())
        }
    }

    impl Predicate for SubtypePredicate {
        fn matches(&self, asset: &Asset) -> bool {
            if let Ok(mime) = asset.media_type.parse::<mime::Mime>() {
                mime.subtype().eq(&self.0.as_str())
            } else {
                false
            }
        }
    }

    /// Matches if the asset contains a tag equal to the value.
    #[derive(Debug)]
    pub struct TagPredicate(String);

    impl TagPredicate {
        pub fn new<S: Into<String>>(tag: S) -> Self {
            Self(tag.into().to_lowercase())
        }
    }

    impl Predicate for TagPredicate {
        fn matches(&self, asset: &Asset) -> bool {
            asset.tags.iter().any(|t| t.to_lowercase() == self.0)
        }
    }

    /// Location field on which to match the query.
    ///
    /// Not to be confused with the location operations in the entities
    /// module.
    #[derive(Clone, Debug)]
    pub enum LocationField {
        Any,
        Label,
        City,
        Region,
    }

    impl FromStr for LocationField {
        type Err = Error;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            match s {
                "any" => Ok(LocationField::Any),
                "label" => Ok(LocationField::Label),
                "city" => Ok(LocationField::City),
                "region" => Ok(LocationField::Region),
                _ => Err(anyhow!("field must be 'any', 'label', 'city', or 'region'")),
            }
        }
    }

    /// Matches if the asset has a location field that equals the value.
    ///
    /// If the value is the empty string, then the predicate matches if the
    /// corresponding field is not set (for `any`, if any field is not set).
    #[derive(Debug)]
    pub struct LocationPredicate(LocationField, String);

    impl LocationPredicate {
        pub fn new<S: Into<String>>(location: S) -> Self {
            Self(LocationField::Any, location.into().to_lowercase())
        }

        pub fn with_field<S: Into<String>>(field: LocationField, location: S) -> Self {
            Self(field, location.into().to_lowercase())
        }
    }

    impl Predicate for LocationPredicate {
        fn matches(&self, asset: &Asset) -> bool {
            let Some(location) = asset.location.as_ref() else {
                return false;
            };
            if self.1.is_empty() {
                // corresponding field must not have a value
                match self.0 {
                    LocationField::Any => {
                        location.label.is_none()
                            || location.city.is_none()
                            || location.region.is_none()
                    }
                    LocationField::Label => location.label.is_none(),
                    LocationField::City => location.city.is_none(),
                    LocationField::Region => location.region.is_none(),
                }
            } else {
                // corresponding field must have a matching value
                let field_eq = |field: &Option<String>| {
                    field
                        .as_ref()
                        .map(|v| v.to_lowercase() == self.1)
                        .unwrap_or(false)
                };
                match self.0 {
                    LocationField::Any => location.partial_match(&self.1),
                    LocationField::Label => field_eq(&location.label),
                    LocationField::City => field_eq(&location.city),
                    LocationField::Region => field_eq(&location.region),
                }
            }
        }
    }

    /// Matches if the asset "best date" comes _after_ the given date.
    #[derive(Debug)]
    pub struct AfterPredicate(DateTime<Utc>);

    impl AfterPredicate {
        pub fn new(input: &str) -> Result<Self, Error> {
            Ok(Self(parse_datetime(input)?))
        }
    }

    impl Predicate for AfterPredicate {
        fn matches(&self, asset: &Asset) -> bool {
            asset.best_date() > self.0
        }
    }

    /// Matches if the asset "best date" comes _before_ the given date.
    #[derive(Debug)]
    pub struct BeforePredicate(DateTime<Utc>);

    impl BeforePredicate {
        pub fn new(input: &str) -> Result<Self, Error> {
            Ok(Self(parse_datetime(input)?))
        }
    }

    impl Predicate for BeforePredicate {
        fn matches(&self, asset: &Asset) -> bool {
            asset.best_date() < self.0
        }
    }

    /// A liberal date parser that accepts anything from 2010-08-30T12:30:15
    /// down to just 2010.
    fn parse_datetime(input: &str) -> Result<DateTime<Utc>, Error> {
        if input.contains('T') {
            let parts: Vec<&str> = input.split('T').collect();
            let date = parse_date(parts[0])?;
            let time = parse_time(parts[1])?;
            Ok(date.and_time(time).and_utc())
        } else {
            let ok = parse_date(input).map(|d| d.and_hms_opt(0, 0, 0).unwrap().and_utc())?;
            Ok(ok)
        }
    }

    /// Parse only the date using a liberal parser.
    fn parse_date(input: &str) -> Result<NaiveDate, ParseError> {
        let num_dashes = input.chars().filter(|c| *c == '-').count();
        if num_dashes == 2 {
            NaiveDate::parse_from_str(input, "%Y-%m-%d")
        } else if num_dashes == 1 {
            let padded = format!("{}-01", input);
            NaiveDate::parse_from_str(&padded, "%Y-%m-%d")
        } else {
            let padded = format!("{}-01-01", input);
            NaiveDate::parse_from_str(&padded, "%Y-%m-%d")
        }
    }

    /// Parse only the time using a liberal parser.
    fn parse_time(input: &str) -> Result<NaiveTime, ParseError> {
        let num_colons = input.chars().filter(|c| *c == ':').count();
        if num_colons == 2 {
            NaiveTime::parse_from_str(input, "%H:%M:%S")
        } else if num_colons == 1 {
            let padded = format!("{}:00", input);
            NaiveTime::parse_from_str(&padded, "%H:%M:%S")
        } else {
            let padded = format!("{}:00:00", input);
            NaiveTime::parse_from_str(&padded, "%H:%M:%S")
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::domain::entities::Location;
        use chrono::TimeZone;

        fn basic_asset() -> Asset {
            Asset {
                key: "abc123".to_owned(),
                checksum: "cafebabe".to_owned(),
                filename: "img_1234.jpg".to_owned(),
                byte_length: 1024,
                media_type: "image/jpeg".to_owned(),
                tags: vec!["cat".to_owned(), "dog".to_owned()],
                import_date: Utc::now(),
                caption: None,
                location: None,
                user_date: None,
                original_date: None,
                dimensions: None,
            }
        }

        #[test]
        fn test_locationfield_from_str() {
            assert!(LocationField::from_str("city").is_ok());
            assert!(LocationField::from_str("label").is_ok());
            assert!(LocationField::from_str("region").is_ok());
            assert!(LocationField::from_str("any").is_ok());
            assert!(LocationField::from_str("boofar").is_err());
        }

        #[test]
        fn test_build_predicate() {
            let result = build_predicate(vec!["loc".into(), "label".into(), "beach".into()], 0);
            assert!(result.is_ok());
            let result = build_predicate(vec!["loc".into(), "beach".into(), "label".into()], 0);
            assert!(result.is_err());
            let result = build_predicate(vec!["loc".into(), "beach".into()], 0);
            assert!(result.is_ok());
            let result = build_predicate(vec!["loc".into(), "label".into(), "".into()], 0);
            assert!(result.is_ok());
            let result = build_predicate(vec!["tag".into()], 8);
            let err = result.unwrap_err();
            assert!(err.to_string().contains("offset 8"));
        }

        #[test]
        fn test_query_filename_predicate() {
            let mut asset1 = basic_asset();
            asset1.filename = "IMG_1234.jpg".to_owned();
            // the comparison is against the literal, case included
            let pred = FilenamePredicate::new("IMG_1234.jpg");
            assert!(pred.matches(&asset1));
            let pred = FilenamePredicate::new("img_1234.jpg");
            assert!(!pred.matches(&asset1));
            let pred = FilenamePredicate::new("MIV_2326.mov");
            assert!(!pred.matches(&asset1));
        }

        #[test]
        fn test_query_type_predicate() {
            let mut asset1 = basic_asset();
            let pred_t = TypePredicate::new("image");
            let lambda = Constraint::Lambda(Box::new(pred_t));
            assert!(lambda.matches(&asset1));

            let pred_t = TypePredicate::new("video");
            let lambda = Constraint::Lambda(Box::new(pred_t));
            assert!(!lambda.matches(&asset1));

            asset1.media_type = "foobar".to_owned();
            assert!(!lambda.matches(&asset1));
        }

        #[test]
        fn test_query_subtype_predicate() {
            let mut asset1 = basic_asset();
            let pred_t = SubtypePredicate::new("jpeg");
            let lambda = Constraint::Lambda(Box::new(pred_t));
            assert!(lambda.matches(&asset1));

            let pred_t = SubtypePredicate::new("png");
            let lambda = Constraint::Lambda(Box::new(pred_t));
            assert!(!lambda.matches(&asset1));

            asset1.media_type = "foobar".to_owned();
            assert!(!lambda.matches(&asset1));
        }

        #[test]
        fn test_query_and_constraint() {
            let mut asset1 = basic_asset();
            asset1.location = Some(Location::new("paris"));
            let pred_a = TagPredicate::new("cat");
            let pred_b = LocationPredicate::new("paris");
            let and_c = Constraint::And(Box::new(pred_a), Box::new(pred_b));
            assert!(and_c.matches(&asset1));

            let pred_a = TagPredicate::new("cat");
            let pred_b = TagPredicate::new("rabbit");
            let and_c = Constraint::And(Box::new(pred_a), Box::new(pred_b));
            assert!(!and_c.matches(&asset1));
        }

        #[test]
        fn test_query_or_constraint() {
            let asset1 = basic_asset();
            let pred_a = TagPredicate::new("cat");
            let pred_b = LocationPredicate::new("rabbit");
            let or_c = Constraint::Or(Box::new(pred_a), Box::new(pred_b));
            assert!(or_c.matches(&asset1));

            let pred_a = TagPredicate::new("mouse");
            let pred_b = TagPredicate::new("rabbit");
            let or_c = Constraint::Or(Box::new(pred_a), Box::new(pred_b));
            assert!(!or_c.matches(&asset1));
        }

        #[test]
        fn test_query_not_constraint() {
            let mut asset1 = basic_asset();
            asset1.location = Some(Location::new("paris"));
            let pred_a = LocationPredicate::new("london");
            let not_c = Constraint::Not(Box::new(pred_a));
            assert!(not_c.matches(&asset1));

            let pred_a = TagPredicate::new("cat");
            let not_c = Constraint::Not(Box::new(pred_a));
            assert!(!not_c.matches(&asset1));
        }

        #[test]
        fn test_query_tag_predicate() {
            let asset1 = basic_asset();
            let pred = TagPredicate::new("cat");
            assert!(pred.matches(&asset1));
            let pred = TagPredicate::new("dog");
            assert!(pred.matches(&asset1));
            let pred = TagPredicate::new("DOG");
            assert!(pred.matches(&asset1));
            let pred = TagPredicate::new("rabbit");
            assert!(!pred.matches(&asset1));
        }

        #[test]
        fn test_query_location_predicate() {
            let mut asset1 = basic_asset();
            asset1.location = Some(Location::with_parts("Eiffel Tower", "Paris", "France"));
            let pred = LocationPredicate::new("paris");
            assert!(pred.matches(&asset1));
            let pred = LocationPredicate::new("france");
            assert!(pred.matches(&asset1));
            let pred = LocationPredicate::with_field(LocationField::Region, "france");
            assert!(pred.matches(&asset1));
            let pred = LocationPredicate::with_field(LocationField::Region, "paris");
            assert!(!pred.matches(&asset1));
            let pred = LocationPredicate::with_field(LocationField::City, "paris");
            assert!(pred.matches(&asset1));
            let pred = LocationPredicate::new("eiffel tower");
            assert!(pred.matches(&asset1));
            let pred = LocationPredicate::with_field(LocationField::Label, "eiffel tower");
            assert!(pred.matches(&asset1));
            let pred = LocationPredicate::new("texas");
            assert!(!pred.matches(&asset1));
            // no location at all fails any comparison
            asset1.location = None;
            let pred = LocationPredicate::new("paris");
            assert!(!pred.matches(&asset1));
        }

        #[test]
        fn test_query_location_predicate_empty() {
            let mut asset1 = basic_asset();
            asset1.location = Some(Location::with_parts("", "Paris", "France"));
            let pred = LocationPredicate::new("paris");
            assert!(pred.matches(&asset1));
            let pred = LocationPredicate::with_field(LocationField::City, "paris");
            assert!(pred.matches(&asset1));
            // an empty argument matches the unset label component
            let pred = LocationPredicate::new("");
            assert!(pred.matches(&asset1));
            let pred = LocationPredicate::with_field(LocationField::Label, "");
            assert!(pred.matches(&asset1));
            let pred = LocationPredicate::with_field(LocationField::City, "");
            assert!(!pred.matches(&asset1));
            let pred = LocationPredicate::new("texas");
            assert!(!pred.matches(&asset1));
        }

        #[test]
        fn test_query_parse_datetime() {
            let actual = parse_datetime("2010-08-30T12:15:30").unwrap();
            let expected = Utc
                .with_ymd_and_hms(2010, 8, 30, 12, 15, 30)
                .single()
                .unwrap();
            assert_eq!(actual, expected);

            let actual = parse_datetime("2010-08-30T12:15").unwrap();
            let expected = Utc
                .with_ymd_and_hms(2010, 8, 30, 12, 15, 0)
                .single()
                .unwrap();
            assert_eq!(actual, expected);

            let actual = parse_datetime("2010-08-30T12").unwrap();
            let expected = Utc
                .with_ymd_and_hms(2010, 8, 30, 12, 0, 0)
                .single()
                .unwrap();
            assert_eq!(actual, expected);

            let actual = parse_datetime("2010-08-30").unwrap();
            let expected = Utc.with_ymd_and_hms(2010, 8, 30, 0, 0, 0).single().unwrap();
            assert_eq!(actual, expected);

            let actual = parse_datetime("2010-08").unwrap();
            let expected = Utc.with_ymd_and_hms(2010, 8, 1, 0, 0, 0).single().unwrap();
            assert_eq!(actual, expected);

            let actual = parse_datetime("2010").unwrap();
            let expected = Utc.with_ymd_and_hms(2010, 1, 1, 0, 0, 0).single().unwrap();
            assert_eq!(actual, expected);

            assert!(parse_datetime("yesterday").is_err());
        }

        #[test]
        fn test_query_after_predicate() {
            let pred = AfterPredicate::new("2010-08-30").unwrap();
            let earlier = Utc.with_ymd_and_hms(2009, 8, 30, 0, 0, 0).single().unwrap();
            let later = Utc.with_ymd_and_hms(2010, 9, 1, 0, 0, 0).single().unwrap();
            let mut asset1 = basic_asset();
            asset1.import_date = earlier;
            assert!(!pred.matches(&asset1));
            asset1.import_date = later;
            assert!(pred.matches(&asset1));

            asset1.import_date = earlier;
            asset1.original_date = Some(later);
            assert!(pred.matches(&asset1));

            asset1.original_date = None;
            asset1.user_date = Some(later);
            assert!(pred.matches(&asset1));
        }

        #[test]
        fn test_query_before_predicate() {
            let pred = BeforePredicate::new("2010-08-30").unwrap();
            let earlier = Utc.with_ymd_and_hms(2009, 8, 30, 0, 0, 0).single().unwrap();
            let later = Utc.with_ymd_and_hms(2010, 9, 1, 0, 0, 0).single().unwrap();
            let mut asset1 = basic_asset();
            asset1.import_date = later;
            assert!(!pred.matches(&asset1));
            asset1.import_date = earlier;
            assert!(pred.matches(&asset1));

            asset1.import_date = later;
            asset1.original_date = Some(earlier);
            assert!(pred.matches(&asset1));

            asset1.original_date = None;
            asset1.user_date = Some(earlier);
            assert!(pred.matches(&asset1));
        }
    }
}

pub mod parser {
    //!
    //! Builds a constraint tree from the token stream.
    //!
    //! The grammar is small enough for a hand-written recursive descent
    //! pass: a query is a sequence of terms joined by `and` and `or` (or by
    //! nothing at all, which reads as `and`), and a term is any number of
    //! negations applied to a predicate or a parenthesized group. The
    //! operators all bind equally and associate to the left, so
    //! `a or b and c` folds as `(a or b) and c`.
    //!

    use super::lexer::{tokenize, Token, TokenType};
    use super::query::{build_predicate, Constraint};
    use anyhow::{anyhow, Error};

    /// Parse the given query and return a constraint for filtering assets.
    pub fn parse_query(query: &str) -> Result<Constraint, Error> {
        let mut parser = Parser::new(query);
        let constraint = parser.parse_expression()?;
        let trailing = parser.peek();
        if trailing.typ != TokenType::Eof {
            return Err(anyhow!("trailing tokens: {}", trailing));
        }
        Ok(constraint)
    }

    struct Parser {
        tokens: Vec<Token>,
        index: usize,
    }

    impl Parser {
        fn new(query: &str) -> Parser {
            Parser {
                tokens: tokenize(query),
                index: 0,
            }
        }

        // The token under consideration. The token list always ends with
        // either Eof or Error, so clamping to the last entry is safe.
        fn peek(&self) -> &Token {
            &self.tokens[self.index.min(self.tokens.len() - 1)]
        }

        fn advance(&mut self) -> Token {
            let token = self.peek().clone();
            if self.index < self.tokens.len() {
                self.index += 1;
            }
            token
        }

        /// Fold terms left to right; a missing operator between adjacent
        /// terms reads as `and`.
        fn parse_expression(&mut self) -> Result<Constraint, Error> {
            if self.peek().typ == TokenType::Eof {
                return Ok(Constraint::Empty);
            }
            let mut ret = self.parse_term()?;
            loop {
                match self.peek().typ {
                    TokenType::And => {
                        self.advance();
                        let rhs = self.parse_term()?;
                        ret = Constraint::And(Box::new(ret), Box::new(rhs));
                    }
                    TokenType::Or => {
                        self.advance();
                        let rhs = self.parse_term()?;
                        ret = Constraint::Or(Box::new(ret), Box::new(rhs));
                    }
                    TokenType::Close | TokenType::Eof => break,
                    TokenType::Error => return Err(anyhow!("{}", self.peek().val)),
                    _ => {
                        let rhs = self.parse_term()?;
                        ret = Constraint::And(Box::new(ret), Box::new(rhs));
                    }
                }
            }
            Ok(ret)
        }

        /// A term is a predicate or a group, possibly negated. Stacked
        /// negations cancel each other out.
        fn parse_term(&mut self) -> Result<Constraint, Error> {
            let mut negated = false;
            while self.peek().typ == TokenType::Not {
                self.advance();
                negated = !negated;
            }
            let token = self.peek().clone();
            let ret = match token.typ {
                TokenType::Open => self.parse_group()?,
                TokenType::Predicate => self.parse_atom()?,
                TokenType::Error => return Err(anyhow!("{}", token.val)),
                TokenType::Eof => return Err(anyhow!("expected a term at offset {}", token.pos)),
                TokenType::Close => {
                    return Err(anyhow!("found ) without ( at offset {}", token.pos))
                }
                _ => return Err(anyhow!("expected a term, got {}", token)),
            };
            if negated {
                Ok(Constraint::Not(Box::new(ret)))
            } else {
                Ok(ret)
            }
        }

        // Everything between an open paren and its matching close.
        fn parse_group(&mut self) -> Result<Constraint, Error> {
            let open = self.advance();
            let inner = self.parse_expression()?;
            if self.peek().typ != TokenType::Close {
                return Err(anyhow!("no matching ) for {}", open));
            }
            self.advance();
            Ok(inner)
        }

        // A predicate keyword and its colon-separated arguments. A colon
        // with nothing after it contributes an empty argument.
        fn parse_atom(&mut self) -> Result<Constraint, Error> {
            let keyword = self.advance();
            let mut atom: Vec<String> = vec![keyword.val];
            let mut expecting_arg = false;
            loop {
                match self.peek().typ {
                    TokenType::Colon => {
                        self.advance();
                        expecting_arg = true;
                    }
                    TokenType::Arg => {
                        let arg = self.advance();
                        atom.push(arg.val);
                        expecting_arg = false;
                    }
                    _ => break,
                }
            }
            if expecting_arg {
                atom.push(String::new());
            }
            build_predicate(atom, keyword.pos).map(Constraint::Lambda)
        }
    }

}

pub mod lexer {
    //!
    //! Turns a query string into the token stream the parser consumes.
    //!
    //! A cursor walks the input one character at a time while a single loop
    //! decides what the next token must be, looking at the leading
    //! character and at whether the previous token completed an operand.
    //! That trailing position is the only place `and` and `or` are
    //! reserved, which leaves both words usable as predicate arguments.
    //! Every token records the byte offset where it began, and anything the
    //! lexer cannot make sense of becomes an `Error` token carrying that
    //! offset, which the parser passes along to the caller.
    //!

    use std::fmt;

    /// Defines the type of a particular token.
    #[derive(Clone, Copy, PartialEq, Debug)]
    pub enum TokenType {
        And,
        Arg,
        Close,
        Colon,
        Eof,
        Error,
        Not,
        Open,
        Or,
        Predicate,
    }

    /// A token and the byte offset where it started.
    #[derive(Clone, Debug, PartialEq)]
    pub struct Token {
        pub typ: TokenType,
        pub val: String,
        pub pos: usize,
    }

    impl fmt::Display for Token {
        fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
            write!(f, "{:?}('{}') at offset {}", self.typ, self.val, self.pos)
        }
    }

    fn error_token(message: &str, pos: usize) -> Token {
        Token {
            typ: TokenType::Error,
            val: format!("{} at offset {}", message, pos),
            pos,
        }
    }

    // Characters allowed in an unquoted argument: anything except
    // whitespace and the punctuation the lexer claims for itself.
    fn is_bare_arg_char(ch: char) -> bool {
        !ch.is_whitespace() && ch != ':' && ch != '(' && ch != ')'
    }

    // Cursor over the input with single-character lookahead.
    struct Cursor<'a> {
        input: &'a str,
        pos: usize,
    }

    impl<'a> Cursor<'a> {
        fn new(input: &'a str) -> Cursor<'a> {
            Cursor { input, pos: 0 }
        }

        fn peek(&self) -> Option<char> {
            self.input[self.pos..].chars().next()
        }

        fn bump(&mut self) -> Option<char> {
            let ch = self.peek()?;
            self.pos += ch.len_utf8();
            Some(ch)
        }

        // Consume characters for as long as they satisfy the test,
        // returning the span that was consumed.
        fn take_while(&mut self, test: impl Fn(char) -> bool) -> &'a str {
            let start = self.pos;
            while let Some(ch) = self.peek() {
                if !test(ch) {
                    break;
                }
                self.bump();
            }
            &self.input[start..self.pos]
        }

        fn skip_whitespace(&mut self) {
            self.take_while(char::is_whitespace);
        }

        // True if the keyword sits at the cursor followed by whitespace or
        // an open paren, the only endings that make it an operator.
        fn at_keyword(&self, keyword: &str) -> bool {
            if let Some(after) = self.input[self.pos..].strip_prefix(keyword) {
                matches!(after.chars().next(), Some(ch) if ch.is_whitespace() || ch == '(')
            } else {
                false
            }
        }
    }

    /// Split the query into tokens. The returned list always ends with
    /// either an `Eof` token or the `Error` that stopped the analysis.
    pub fn tokenize(input: &str) -> Vec<Token> {
        let mut cursor = Cursor::new(input);
        let mut tokens: Vec<Token> = Vec::new();
        // set after each argument or closing paren, the positions where the
        // boolean keywords are reserved
        let mut operand_done = false;
        loop {
            cursor.skip_whitespace();
            let start = cursor.pos;
            let Some(ch) = cursor.peek() else {
                tokens.push(Token {
                    typ: TokenType::Eof,
                    val: String::new(),
                    pos: start,
                });
                break;
            };
            if ch == '(' {
                cursor.bump();
                tokens.push(Token {
                    typ: TokenType::Open,
                    val: "(".into(),
                    pos: start,
                });
                operand_done = false;
            } else if ch == ')' {
                cursor.bump();
                tokens.push(Token {
                    typ: TokenType::Close,
                    val: ")".into(),
                    pos: start,
                });
                operand_done = true;
            } else if ch == '-' {
                cursor.bump();
                tokens.push(Token {
                    typ: TokenType::Not,
                    val: "-".into(),
                    pos: start,
                });
                operand_done = false;
            } else if operand_done && cursor.at_keyword("and") {
                cursor.pos += 3;
                tokens.push(Token {
                    typ: TokenType::And,
                    val: "and".into(),
                    pos: start,
                });
                operand_done = false;
            } else if operand_done && cursor.at_keyword("or") {
                cursor.pos += 2;
                tokens.push(Token {
                    typ: TokenType::Or,
                    val: "or".into(),
                    pos: start,
                });
                operand_done = false;
            } else {
                if !scan_predicate(&mut cursor, &mut tokens) {
                    break;
                }
                operand_done = true;
            }
        }
        tokens
    }

    // Scan a predicate, its colon, and the chain of arguments that follow.
    // Returns false if an error token ended the analysis.
    fn scan_predicate(cursor: &mut Cursor, tokens: &mut Vec<Token>) -> bool {
        let start = cursor.pos;
        let name = cursor.take_while(|ch| ch.is_alphabetic());
        if name.is_empty() || cursor.peek() != Some(':') {
            tokens.push(error_token("bare literals unsupported", start));
            return false;
        }
        tokens.push(Token {
            typ: TokenType::Predicate,
            val: name.to_owned(),
            pos: start,
        });
        while cursor.peek() == Some(':') {
            let colon_at = cursor.pos;
            cursor.bump();
            tokens.push(Token {
                typ: TokenType::Colon,
                val: ":".into(),
                pos: colon_at,
            });
            let arg_at = cursor.pos;
            match cursor.peek() {
                Some(quote) if quote == '"' || quote == '\'' => {
                    cursor.bump();
                    match scan_quoted(cursor, quote) {
                        Ok(text) => tokens.push(Token {
                            typ: TokenType::Arg,
                            val: text,
                            pos: arg_at,
                        }),
                        Err(message) => {
                            tokens.push(error_token(&message, arg_at));
                            return false;
                        }
                    }
                    // a quoted argument always ends the chain
                    break;
                }
                Some(_) => {
                    let text = cursor.take_while(is_bare_arg_char);
                    tokens.push(Token {
                        typ: TokenType::Arg,
                        val: text.to_owned(),
                        pos: arg_at,
                    });
                }
                None => break,
            }
        }
        true
    }

    // Scan a quoted argument, decoding escapes along the way. The cursor
    // sits just past the opening quote; on success it ends just past the
    // closing one. Supported escapes are the quotes themselves, space and
    // tab, the \a \b \t \n \r controls, a doubled backslash, and \xNNNN;
    // for an arbitrary code point.
    fn scan_quoted(cursor: &mut Cursor, quote: char) -> Result<String, String> {
        let mut text = String::new();
        loop {
            let Some(ch) = cursor.bump() else {
                return Err("unclosed quoted string".into());
            };
            if ch == quote {
                return Ok(text);
            }
            if ch != '\\' {
                text.push(ch);
                continue;
            }
            let Some(escape) = cursor.bump() else {
                return Err("dangling escape at end of string".into());
            };
            match escape {
                '"' | '\'' | ' ' | '\t' | '\\' => text.push(escape),
                'a' => text.push('\x07'),
                'b' => text.push('\x08'),
                't' => text.push('\t'),
                'n' => text.push('\n'),
                'r' => text.push('\r'),
                'x' => {
                    let digits = cursor.take_while(|c| c != ';' && c != quote);
                    if cursor.peek() != Some(';') {
                        return Err("missing ; after \\x escape".into());
                    }
                    cursor.bump();
                    let code = u32::from_str_radix(digits, 16)
                        .map_err(|_| String::from("invalid hexadecimal escape"))?;
                    match char::from_u32(code) {
                        Some(decoded) => text.push(decoded),
                        None => return Err("escape is not a valid code point".into()),
                    }
                }
                _ => return Err(format!("unrecognized escape \\{}", escape)),
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn verify_tokens(input: &str, expected: Vec<(TokenType, &str)>) {
            let actual = tokenize(input);
            assert_eq!(actual.last().unwrap().typ, TokenType::Eof, "{:?}", input);
            assert_eq!(actual.len(), expected.len() + 1, "token count for {:?}", input);
            for (token, (typ, val)) in actual.iter().zip(expected.iter()) {
                assert_eq!(token.typ, *typ, "{}", token);
                assert_eq!(token.val, *val, "{}", token);
            }
        }

        #[test]
        fn test_lexer_empty_input() {
            verify_tokens("", vec![]);
            verify_tokens("   \r  \n   \t  ", vec![]);
        }

        #[test]
        fn test_lexer_token_positions() {
            let tokens = tokenize("tag:cat boofar:bit");
            assert_eq!(tokens[0].typ, TokenType::Predicate);
            assert_eq!(tokens[0].pos, 0);
            assert_eq!(tokens[1].typ, TokenType::Colon);
            assert_eq!(tokens[1].pos, 3);
            assert_eq!(tokens[2].typ, TokenType::Arg);
            assert_eq!(tokens[2].pos, 4);
            assert_eq!(tokens[3].typ, TokenType::Predicate);
            assert_eq!(tokens[3].val, "boofar");
            assert_eq!(tokens[3].pos, 8);
        }

        #[test]
        fn test_lexer_separators_ignored() {
            let vec = vec![(TokenType::Open, "("), (TokenType::Close, ")")];
            verify_tokens("     (\n\t )\r\n", vec);
        }

        #[test]
        fn test_lexer_open_close_paren() {
            let vec = vec![(TokenType::Open, "("), (TokenType::Close, ")")];
            verify_tokens("()", vec);
        }

        #[test]
        fn test_lexer_basic_predicates() {
            let vec = vec![
                (TokenType::Predicate, "tag"),
                (TokenType::Colon, ":"),
                (TokenType::Arg, "kittens"),
                (TokenType::Not, "-"),
                (TokenType::Predicate, "tag"),
                (TokenType::Colon, ":"),
                (TokenType::Arg, "clouds"),
                (TokenType::Predicate, "loc"),
                (TokenType::Colon, ":"),
                (TokenType::Arg, "castro valley"),
                (TokenType::Predicate, "loc"),
                (TokenType::Colon, ":"),
                (TokenType::Arg, "lower manhatten"),
            ];
            verify_tokens(
                "tag:kittens -tag:clouds loc:'castro valley' loc:\"lower manhatten\"",
                vec,
            );
        }

        #[test]
        fn test_lexer_complex_predicates() {
            let vec = vec![
                (TokenType::Predicate, "loc"),
                (TokenType::Colon, ":"),
                (TokenType::Arg, "city"),
                (TokenType::Colon, ":"),
                (TokenType::Arg, "london"),
                (TokenType::Or, "or"),
                (TokenType::Predicate, "loc"),
                (TokenType::Colon, ":"),
                (TokenType::Arg, "region"),
                (TokenType::Colon, ":"),
                (TokenType::Arg, "japan"),
                (TokenType::Predicate, "loc"),
                (TokenType::Colon, ":"),
                (TokenType::Arg, "label"),
                (TokenType::Colon, ":"),
            ];
            verify_tokens("loc:city:london or loc:region:japan loc:label:", vec);
        }

        #[test]
        fn test_lexer_basic_operators() {
            let vec = vec![
                (TokenType::Predicate, "tag"),
                (TokenType::Colon, ":"),
                (TokenType::Arg, "kittens"),
                (TokenType::Or, "or"),
                (TokenType::Predicate, "tag"),
                (TokenType::Colon, ":"),
                (TokenType::Arg, "clouds"),
                (TokenType::And, "and"),
                (TokenType::Predicate, "tag"),
                (TokenType::Colon, ":"),
                (TokenType::Arg, "rain"),
            ];
            verify_tokens("tag:kittens or tag:clouds and tag:rain", vec);
        }

        #[test]
        fn test_lexer_keywords_only_after_operands() {
            // at the start of a term the keywords are ordinary predicates
            let tokens = tokenize("and:cat");
            assert_eq!(tokens[0].typ, TokenType::Predicate);
            assert_eq!(tokens[0].val, "and");
            // and in argument position they are ordinary arguments
            let tokens = tokenize("tag:or");
            assert_eq!(tokens[2].typ, TokenType::Arg);
            assert_eq!(tokens[2].val, "or");
            // a word merely starting with a keyword is not an operator
            let vec = vec![
                (TokenType::Predicate, "tag"),
                (TokenType::Colon, ":"),
                (TokenType::Arg, "cat"),
                (TokenType::Predicate, "order"),
                (TokenType::Colon, ":"),
                (TokenType::Arg, "asc"),
            ];
            verify_tokens("tag:cat order:asc", vec);
        }

        #[test]
        fn test_lexer_repeated_negation() {
            let vec = vec![
                (TokenType::Not, "-"),
                (TokenType::Not, "-"),
                (TokenType::Predicate, "tag"),
                (TokenType::Colon, ":"),
                (TokenType::Arg, "kittens"),
                (TokenType::Or, "or"),
                (TokenType::Not, "-"),
                (TokenType::Predicate, "tag"),
                (TokenType::Colon, ":"),
                (TokenType::Arg, "clouds"),
            ];
            verify_tokens("--tag:kittens or - tag:clouds", vec);
        }

        #[test]
        fn test_lexer_quoted_dates_example() {
            let vec = vec![
                (TokenType::Not, "-"),
                (TokenType::Open, "("),
                (TokenType::Predicate, "after"),
                (TokenType::Colon, ":"),
                (TokenType::Arg, "2010-01-01"),
                (TokenType::Predicate, "before"),
                (TokenType::Colon, ":"),
                (TokenType::Arg, "2010-03-02T12:33:44"),
                (TokenType::Close, ")"),
                (TokenType::Or, "or"),
                (TokenType::Predicate, "loc"),
                (TokenType::Colon, ":"),
                (TokenType::Arg, "Amsterdam"),
            ];
            verify_tokens(
                "-(after:\"2010-01-01\" before:\"2010-03-02T12:33:44\") or loc:\"Amsterdam\"",
                vec,
            );
        }

        #[test]
        fn test_lexer_escapes() {
            let tokens = tokenize("loc:\"a\\x20;b\"");
            assert_eq!(tokens[2].typ, TokenType::Arg);
            assert_eq!(tokens[2].val, "a b");
            let tokens = tokenize("loc:\"\\x65e5;\\x672c;\\x8a9e;\"");
            assert_eq!(tokens[2].val, "日本語");
            let tokens = tokenize("loc:'don\\'t'");
            assert_eq!(tokens[2].val, "don't");
            let tokens = tokenize("loc:\"tab\\there\"");
            assert_eq!(tokens[2].val, "tab\there");
            let tokens = tokenize("loc:\"a\\\\b\"");
            assert_eq!(tokens[2].val, "a\\b");
        }

        #[test]
        fn test_lexer_bad_escapes() {
            let tokens = tokenize("loc:\"\\f\"");
            let last = tokens.last().unwrap();
            assert_eq!(last.typ, TokenType::Error);
            assert!(last.val.contains("unrecognized escape"));

            let tokens = tokenize("loc:\"\\xZZ;\"");
            assert!(tokens.last().unwrap().val.contains("invalid hexadecimal"));

            let tokens = tokenize("loc:\"\\xD801;\"");
            assert!(tokens.last().unwrap().val.contains("code point"));

            let tokens = tokenize("loc:\"\\x20\"");
            assert!(tokens.last().unwrap().val.contains("missing ;"));

            let tokens = tokenize("loc:\"unclosed");
            assert!(tokens.last().unwrap().val.contains("unclosed"));
        }
    }
}

//! Composable, tie-break-safe ordering for list views.
//!
//! A [`SortSpec`] is an ordered list of `(field, direction)` keys over one
//! entity's sortable fields. Whatever the caller asks for, the final ordering
//! always ends with the entity's tie-break key so that rows with equal values
//! in every requested field still come back in a stable order.
//!
//! Specs can be parsed from a query-string value:
//!
//! ```text
//! date desc, -number, site asc
//! ```
//!
//! A leading `-` means descending, a leading `+` or no prefix ascending; a
//! trailing `asc`/`desc` overrides the prefix.

use std::cmp::Ordering;
use std::fmt;

use nom::{
    branch::alt,
    bytes::complete::{tag_no_case, take_while1},
    character::complete::{char, multispace0, multispace1, one_of, satisfy},
    combinator::{eof, not, opt, peek, value},
    multi::separated_list1,
    sequence::{delimited, preceded, terminated},
    IResult, Parser,
};
use serde::Serialize;

use crate::error::SortParseError;
use crate::models::{Buddy, Dive, DiveSite, Trip};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn sql(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }

    fn apply(self, ordering: Ordering) -> Ordering {
        match self {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    }
}

/// A sortable field of one entity.
pub trait SortField: Copy + Eq + fmt::Debug + 'static {
    type Row;

    /// Unique key appended to every ordering.
    const TIE_BREAK: Self;

    /// Ordering used when the caller supplies none.
    const DEFAULT: &'static [SortKey<Self>];

    /// Column expression for the data source's ORDER BY.
    fn column(self) -> &'static str;

    /// Field accepted in a sort query.
    fn from_name(name: &str) -> Option<Self>;

    fn compare(self, a: &Self::Row, b: &Self::Row) -> Ordering;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SortKey<F> {
    pub field: F,
    pub direction: SortDirection,
}

impl<F> SortKey<F> {
    pub const fn asc(field: F) -> Self {
        Self {
            field,
            direction: SortDirection::Asc,
        }
    }

    pub const fn desc(field: F) -> Self {
        Self {
            field,
            direction: SortDirection::Desc,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec<F: SortField> {
    keys: Vec<SortKey<F>>,
}

impl<F: SortField> Default for SortSpec<F> {
    fn default() -> Self {
        Self {
            keys: F::DEFAULT.to_vec(),
        }
    }
}

impl<F: SortField> SortSpec<F> {
    /// An empty key list falls back to the field set's default ordering.
    pub fn new(keys: Vec<SortKey<F>>) -> Self {
        if keys.is_empty() {
            Self::default()
        } else {
            Self { keys }
        }
    }

    /// Parse a query value such as `"date desc, -number"`. Blank input yields
    /// the default ordering.
    pub fn parse(input: &str) -> Result<Self, SortParseError> {
        if input.trim().is_empty() {
            return Ok(Self::default());
        }

        let raw = match sort_list(input) {
            Ok((_, raw)) => raw,
            Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
                return Err(SortParseError::Syntax {
                    position: input.len() - e.input.len(),
                    message: format!("unexpected input '{}'", e.input.trim()),
                })
            }
            Err(nom::Err::Incomplete(_)) => {
                return Err(SortParseError::Syntax {
                    position: input.len(),
                    message: "unexpected end of input".to_string(),
                })
            }
        };

        let keys = raw
            .into_iter()
            .map(|(sign, name, suffix)| {
                let field = F::from_name(&name.to_ascii_lowercase())
                    .ok_or_else(|| SortParseError::UnknownField(name.to_string()))?;
                let direction = suffix.unwrap_or(match sign {
                    Some('-') => SortDirection::Desc,
                    _ => SortDirection::Asc,
                });
                Ok(SortKey { field, direction })
            })
            .collect::<Result<Vec<_>, SortParseError>>()?;

        Ok(Self::new(keys))
    }

    /// Caller keys only, without the tie-break.
    pub fn requested(&self) -> &[SortKey<F>] {
        &self.keys
    }

    /// The full ordering: requested keys followed by the tie-break.
    pub fn keys(&self) -> impl Iterator<Item = SortKey<F>> + '_ {
        self.keys
            .iter()
            .copied()
            .chain(std::iter::once(SortKey::asc(F::TIE_BREAK)))
    }

    pub fn order_by_clause(&self) -> String {
        self.keys()
            .map(|key| format!("{} {}", key.field.column(), key.direction.sql()))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn compare(&self, a: &F::Row, b: &F::Row) -> Ordering {
        self.keys()
            .map(|key| key.direction.apply(key.field.compare(a, b)))
            .find(|ordering| ordering.is_ne())
            .unwrap_or(Ordering::Equal)
    }

    pub fn sort(&self, rows: &mut [F::Row]) {
        rows.sort_by(|a, b| self.compare(a, b));
    }
}

type RawKey<'a> = (Option<char>, &'a str, Option<SortDirection>);

fn ws<'a, O, F>(inner: F) -> impl Parser<&'a str, Output = O, Error = nom::error::Error<&'a str>>
where
    F: Parser<&'a str, Output = O, Error = nom::error::Error<&'a str>>,
{
    delimited(multispace0, inner, multispace0)
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn identifier(input: &str) -> IResult<&str, &str> {
    take_while1(is_ident_char).parse(input)
}

fn direction(input: &str) -> IResult<&str, SortDirection> {
    terminated(
        alt((
            value(SortDirection::Desc, tag_no_case("desc")),
            value(SortDirection::Asc, tag_no_case("asc")),
        )),
        peek(not(satisfy(is_ident_char))),
    )
    .parse(input)
}

fn sort_key(input: &str) -> IResult<&str, RawKey<'_>> {
    (
        opt(one_of("+-")),
        identifier,
        opt(preceded(multispace1, direction)),
    )
        .parse(input)
}

fn sort_list(input: &str) -> IResult<&str, Vec<RawKey<'_>>> {
    terminated(separated_list1(char(','), ws(sort_key)), eof).parse(input)
}

fn cmp_f64(a: f64, b: f64) -> Ordering {
    a.total_cmp(&b)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DiveSort {
    Id,
    Number,
    Date,
    MaxDepth,
    BottomTime,
    Site,
    Rating,
}

impl SortField for DiveSort {
    type Row = Dive;

    const TIE_BREAK: Self = DiveSort::Id;
    const DEFAULT: &'static [SortKey<Self>] = &[SortKey::desc(DiveSort::Date)];

    fn column(self) -> &'static str {
        match self {
            DiveSort::Id => "d.id",
            DiveSort::Number => "d.number",
            DiveSort::Date => "d.date_time_in",
            DiveSort::MaxDepth => "d.max_depth",
            DiveSort::BottomTime => "d.bottom_time",
            DiveSort::Site => "ds.name",
            DiveSort::Rating => "d.rating",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "id" => Some(DiveSort::Id),
            "number" => Some(DiveSort::Number),
            "date" | "date_time_in" => Some(DiveSort::Date),
            "depth" | "max_depth" => Some(DiveSort::MaxDepth),
            "bottom_time" | "duration" => Some(DiveSort::BottomTime),
            "site" => Some(DiveSort::Site),
            "rating" => Some(DiveSort::Rating),
            _ => None,
        }
    }

    fn compare(self, a: &Dive, b: &Dive) -> Ordering {
        match self {
            DiveSort::Id => a.id.cmp(&b.id),
            DiveSort::Number => a.number.cmp(&b.number),
            DiveSort::Date => a.date_time_in.cmp(&b.date_time_in),
            DiveSort::MaxDepth => cmp_f64(a.max_depth, b.max_depth),
            DiveSort::BottomTime => a.bottom_time.cmp(&b.bottom_time),
            DiveSort::Site => a.dive_site.name.cmp(&b.dive_site.name),
            DiveSort::Rating => a.rating.cmp(&b.rating),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DiveSiteSort {
    Id,
    Name,
    Location,
    Region,
    Country,
    Dives,
}

impl SortField for DiveSiteSort {
    type Row = DiveSite;

    const TIE_BREAK: Self = DiveSiteSort::Id;
    const DEFAULT: &'static [SortKey<Self>] = &[
        SortKey::asc(DiveSiteSort::Country),
        SortKey::asc(DiveSiteSort::Location),
        SortKey::asc(DiveSiteSort::Region),
        SortKey::asc(DiveSiteSort::Name),
    ];

    fn column(self) -> &'static str {
        match self {
            DiveSiteSort::Id => "ds.id",
            DiveSiteSort::Name => "ds.name",
            DiveSiteSort::Location => "ds.location",
            DiveSiteSort::Region => "ds.region",
            DiveSiteSort::Country => "ct.name",
            DiveSiteSort::Dives => "dives_at",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "id" => Some(DiveSiteSort::Id),
            "name" => Some(DiveSiteSort::Name),
            "location" => Some(DiveSiteSort::Location),
            "region" => Some(DiveSiteSort::Region),
            "country" => Some(DiveSiteSort::Country),
            "dives" => Some(DiveSiteSort::Dives),
            _ => None,
        }
    }

    fn compare(self, a: &DiveSite, b: &DiveSite) -> Ordering {
        match self {
            DiveSiteSort::Id => a.id.cmp(&b.id),
            DiveSiteSort::Name => a.name.cmp(&b.name),
            DiveSiteSort::Location => a.location.cmp(&b.location),
            DiveSiteSort::Region => a.region.cmp(&b.region),
            DiveSiteSort::Country => a.country.name.cmp(&b.country.name),
            DiveSiteSort::Dives => a.history.dives.cmp(&b.history.dives),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BuddySort {
    Id,
    Name,
    Dives,
}

impl SortField for BuddySort {
    type Row = Buddy;

    const TIE_BREAK: Self = BuddySort::Id;
    const DEFAULT: &'static [SortKey<Self>] = &[SortKey::asc(BuddySort::Name)];

    fn column(self) -> &'static str {
        match self {
            BuddySort::Id => "b.id",
            BuddySort::Name => "b.name",
            BuddySort::Dives => "dive_count",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "id" => Some(BuddySort::Id),
            "name" => Some(BuddySort::Name),
            "dives" => Some(BuddySort::Dives),
            _ => None,
        }
    }

    fn compare(self, a: &Buddy, b: &Buddy) -> Ordering {
        match self {
            BuddySort::Id => a.id.cmp(&b.id),
            BuddySort::Name => a.name.cmp(&b.name),
            BuddySort::Dives => a.history.dives.cmp(&b.history.dives),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TripSort {
    Id,
    Name,
    Start,
    End,
    Rating,
}

impl SortField for TripSort {
    type Row = Trip;

    const TIE_BREAK: Self = TripSort::Id;
    const DEFAULT: &'static [SortKey<Self>] = &[
        SortKey::desc(TripSort::Start),
        SortKey::asc(TripSort::Name),
    ];

    fn column(self) -> &'static str {
        match self {
            TripSort::Id => "t.id",
            TripSort::Name => "t.name",
            TripSort::Start => "t.start_date",
            TripSort::End => "t.end_date",
            TripSort::Rating => "t.rating",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "id" => Some(TripSort::Id),
            "name" => Some(TripSort::Name),
            "start" | "start_date" => Some(TripSort::Start),
            "end" | "end_date" => Some(TripSort::End),
            "rating" => Some(TripSort::Rating),
            _ => None,
        }
    }

    fn compare(self, a: &Trip, b: &Trip) -> Ordering {
        match self {
            TripSort::Id => a.id.cmp(&b.id),
            TripSort::Name => a.name.cmp(&b.name),
            TripSort::Start => a.start_date.cmp(&b.start_date),
            TripSort::End => a.end_date.cmp(&b.end_date),
            TripSort::Rating => a.rating.cmp(&b.rating),
        }
    }
}

//! Row layout of business listings found by list scrapes.

use serde::{Deserialize, Serialize};

use crate::usv::{join_fields, UNIT_SEP, RECORD_SEP};

pub const PROSPECT_COLUMNS: [&str; 11] = [
    "place_id",
    "company_slug",
    "name",
    "phone",
    "website",
    "domain",
    "full_address",
    "latitude",
    "longitude",
    "keyword",
    "updated_at",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProspectRow {
    pub place_id: String,
    pub company_slug: String,
    pub name: String,
    pub phone: String,
    pub website: String,
    pub domain: String,
    pub full_address: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub keyword: String,
    pub updated_at: String,
}

impl ProspectRow {
    /// One encoded row including its record separator. Separator and line
    /// break characters inside values become spaces.
    pub fn to_usv(&self) -> String {
        let coord = |v: Option<f64>| v.map(|x| format!("{x:.6}")).unwrap_or_default();
        let fields = [
            clean(&self.place_id),
            clean(&self.company_slug),
            clean(&self.name),
            clean(&self.phone),
            clean(&self.website),
            clean(&self.domain),
            clean(&self.full_address),
            coord(self.latitude),
            coord(self.longitude),
            clean(&self.keyword),
            clean(&self.updated_at),
        ];
        let mut row = join_fields(&fields);
        row.push(RECORD_SEP);
        row
    }
}

fn clean(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c == UNIT_SEP || c == RECORD_SEP || c == '\n' || c == '\r' {
                ' '
            } else {
                c
            }
        })
        .collect::<String>()
        .trim()
        .to_string()
}

//! Payload normalization
//!
//! Upstream payloads are opaque JSON. A [`Normalizer`] turns one item of a
//! source's envelope into a validated [`Record`]; the canonical normalizer
//! accepts the common field spellings through serde aliases.

use chrono::{DateTime, Utc};
use gridiron_db::{
    EntityKind, GameStatus, InjuryStatus, NewGame, NewInjury, NewPlayer, NewTeam, PlayerRef,
    Record, TeamRef, ValidationError,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Top-level shape every source must return
///
/// Either a bare JSON array, or an object holding the array under `data` or
/// `items`. Anything else fails deserialization and is retried by the fetch
/// wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Envelope {
    Items(Vec<Value>),
    Wrapped {
        #[serde(alias = "items")]
        data: Vec<Value>,
    },
}

impl Envelope {
    pub fn empty() -> Self {
        Envelope::Items(Vec::new())
    }

    pub fn into_items(self) -> Vec<Value> {
        match self {
            Envelope::Items(items) | Envelope::Wrapped { data: items } => items,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Envelope::Items(items) | Envelope::Wrapped { data: items } => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Envelope {
    fn default() -> Self {
        Self::empty()
    }
}

/// Maps one upstream item to a store record
pub trait Normalizer: Send + Sync {
    /// Kind of record this normalizer produces
    fn kind(&self) -> EntityKind;

    /// Normalize and validate a single item
    fn normalize(&self, item: &Value) -> Result<Record, ValidationError>;
}

/// Field mapping shared by the bundled sources
#[derive(Debug, Clone, Copy)]
pub struct CanonicalNormalizer {
    kind: EntityKind,
}

impl CanonicalNormalizer {
    pub fn new(kind: EntityKind) -> Self {
        Self { kind }
    }
}

impl Normalizer for CanonicalNormalizer {
    fn kind(&self) -> EntityKind {
        self.kind
    }

    fn normalize(&self, item: &Value) -> Result<Record, ValidationError> {
        let record = match self.kind {
            EntityKind::Teams => Record::Team(parse::<WireTeam>("team", item)?.into()),
            EntityKind::Players => Record::Player(parse::<WirePlayer>("player", item)?.try_into()?),
            EntityKind::Games => Record::Game(parse::<WireGame>("game", item)?.try_into()?),
            EntityKind::Injuries => Record::Injury(parse::<WireInjury>("injury", item)?.try_into()?),
        };
        record.validate()?;
        Ok(record)
    }
}

fn parse<T: DeserializeOwned>(entity: &'static str, item: &Value) -> Result<T, ValidationError> {
    if !item.is_object() {
        return Err(ValidationError::Malformed {
            entity,
            reason: "expected a JSON object".to_string(),
        });
    }
    T::deserialize(item).map_err(|e| ValidationError::Malformed {
        entity,
        reason: e.to_string(),
    })
}

// ==================== Wire Types ====================

/// Identifier that upstreams send either as a number or a string
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireId {
    Number(i64),
    Text(String),
}

impl WireId {
    fn into_string(self) -> Option<String> {
        let s = match self {
            WireId::Number(n) => n.to_string(),
            WireId::Text(s) => s.trim().to_string(),
        };
        (!s.is_empty()).then_some(s)
    }
}

/// Number that some upstreams quote
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireNumber {
    Number(i64),
    Text(String),
}

impl WireNumber {
    fn parse(self, entity: &'static str, field: &'static str) -> Result<i64, ValidationError> {
        match self {
            WireNumber::Number(n) => Ok(n),
            WireNumber::Text(s) => s.trim().parse().map_err(|_| ValidationError::InvalidField {
                entity,
                field,
                reason: format!("'{}' is not a number", s),
            }),
        }
    }
}

fn parse_opt(
    value: Option<WireNumber>,
    entity: &'static str,
    field: &'static str,
) -> Result<Option<i64>, ValidationError> {
    value.map(|v| v.parse(entity, field)).transpose()
}

/// Team reference: a number is the upstream's team id, a string a name or
/// abbreviation
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireTeamRef {
    ExternalId(i64),
    Name(String),
}

fn team_ref(
    external_id: Option<WireId>,
    team: Option<WireTeamRef>,
) -> Option<TeamRef> {
    if let Some(ext) = external_id.and_then(WireId::into_string) {
        return Some(TeamRef::ExternalId(ext));
    }
    match team? {
        WireTeamRef::ExternalId(id) => Some(TeamRef::ExternalId(id.to_string())),
        WireTeamRef::Name(name) if !name.trim().is_empty() => Some(TeamRef::Name(name)),
        WireTeamRef::Name(_) => None,
    }
}

#[derive(Debug, Deserialize)]
struct WireTeam {
    #[serde(default, alias = "id", alias = "team_id")]
    external_id: Option<WireId>,
    #[serde(default, alias = "full_name", alias = "display_name", alias = "displayName")]
    name: String,
    #[serde(default, alias = "abbr", alias = "code")]
    abbreviation: Option<String>,
    #[serde(default, alias = "location")]
    city: Option<String>,
    #[serde(default)]
    conference: Option<String>,
    #[serde(default)]
    division: Option<String>,
    #[serde(default, alias = "color")]
    primary_color: Option<String>,
    #[serde(default, alias = "alternate_color")]
    secondary_color: Option<String>,
}

impl From<WireTeam> for NewTeam {
    fn from(wire: WireTeam) -> Self {
        NewTeam {
            external_id: wire.external_id.and_then(WireId::into_string),
            name: wire.name,
            abbreviation: wire.abbreviation,
            city: wire.city,
            conference: wire.conference,
            division: wire.division,
            primary_color: wire.primary_color,
            secondary_color: wire.secondary_color,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WirePlayer {
    #[serde(default, alias = "id", alias = "player_id")]
    external_id: Option<WireId>,
    #[serde(default, alias = "full_name", alias = "displayName")]
    name: String,
    #[serde(default, alias = "pos")]
    position: Option<String>,
    #[serde(default, alias = "team_name", alias = "team_abbreviation")]
    team: Option<WireTeamRef>,
    #[serde(default)]
    team_external_id: Option<WireId>,
    #[serde(default, alias = "jersey", alias = "number")]
    jersey_number: Option<WireNumber>,
    #[serde(default)]
    height: Option<WireId>,
    #[serde(default)]
    weight: Option<WireNumber>,
    #[serde(default)]
    age: Option<WireNumber>,
    #[serde(default, alias = "experience", alias = "years_exp")]
    experience_years: Option<WireNumber>,
    #[serde(default)]
    college: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

impl TryFrom<WirePlayer> for NewPlayer {
    type Error = ValidationError;

    fn try_from(wire: WirePlayer) -> Result<Self, Self::Error> {
        let team = team_ref(wire.team_external_id, wire.team).ok_or(
            ValidationError::MissingField {
                entity: "player",
                field: "team",
            },
        )?;
        Ok(NewPlayer {
            external_id: wire.external_id.and_then(WireId::into_string),
            name: wire.name,
            position: wire.position,
            team,
            jersey_number: parse_opt(wire.jersey_number, "player", "jersey_number")?,
            height: wire.height.and_then(WireId::into_string),
            weight: parse_opt(wire.weight, "player", "weight")?,
            age: parse_opt(wire.age, "player", "age")?,
            experience_years: parse_opt(wire.experience_years, "player", "experience_years")?,
            college: wire.college,
            status: wire.status,
        })
    }
}

#[derive(Debug, Deserialize)]
struct WireGame {
    #[serde(alias = "id", alias = "game_id")]
    external_id: WireId,
    season: WireNumber,
    week: WireNumber,
    #[serde(default, alias = "home")]
    home_team: Option<WireTeamRef>,
    #[serde(default)]
    home_team_external_id: Option<WireId>,
    #[serde(default, alias = "away")]
    away_team: Option<WireTeamRef>,
    #[serde(default)]
    away_team_external_id: Option<WireId>,
    #[serde(default, alias = "date", alias = "start_time", alias = "kickoff")]
    scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    status: Option<GameStatus>,
    #[serde(default)]
    home_score: Option<WireNumber>,
    #[serde(default)]
    away_score: Option<WireNumber>,
    #[serde(default)]
    venue: Option<String>,
}

impl TryFrom<WireGame> for NewGame {
    type Error = ValidationError;

    fn try_from(wire: WireGame) -> Result<Self, Self::Error> {
        let external_id = wire.external_id.into_string().ok_or(ValidationError::MissingField {
            entity: "game",
            field: "external_id",
        })?;
        let home_team = team_ref(wire.home_team_external_id, wire.home_team).ok_or(
            ValidationError::MissingField {
                entity: "game",
                field: "home_team",
            },
        )?;
        let away_team = team_ref(wire.away_team_external_id, wire.away_team).ok_or(
            ValidationError::MissingField {
                entity: "game",
                field: "away_team",
            },
        )?;
        Ok(NewGame {
            external_id,
            season: wire.season.parse("game", "season")?,
            week: wire.week.parse("game", "week")?,
            home_team,
            away_team,
            scheduled_at: wire.scheduled_at,
            status: wire.status.unwrap_or(GameStatus::Scheduled),
            home_score: parse_opt(wire.home_score, "game", "home_score")?,
            away_score: parse_opt(wire.away_score, "game", "away_score")?,
            venue: wire.venue,
        })
    }
}

#[derive(Debug, Deserialize)]
struct WireInjury {
    #[serde(default, alias = "player_id")]
    player_external_id: Option<WireId>,
    #[serde(default, alias = "player", alias = "name")]
    player_name: Option<String>,
    #[serde(default, alias = "team_name", alias = "team_abbreviation")]
    team: Option<WireTeamRef>,
    #[serde(default)]
    team_external_id: Option<WireId>,
    #[serde(alias = "injury_status", alias = "designation")]
    status: InjuryStatus,
    #[serde(default, alias = "injury", alias = "detail")]
    description: Option<String>,
    #[serde(default, alias = "date", alias = "updated")]
    reported_at: Option<DateTime<Utc>>,
}

impl TryFrom<WireInjury> for NewInjury {
    type Error = ValidationError;

    fn try_from(wire: WireInjury) -> Result<Self, Self::Error> {
        let player = match (
            wire.player_external_id.and_then(WireId::into_string),
            wire.player_name,
        ) {
            (Some(ext), _) => PlayerRef::ExternalId(ext),
            (None, Some(name)) => {
                let team = team_ref(wire.team_external_id, wire.team).ok_or(
                    ValidationError::MissingField {
                        entity: "injury",
                        field: "team",
                    },
                )?;
                PlayerRef::NameOnTeam { name, team }
            }
            (None, None) => {
                return Err(ValidationError::MissingField {
                    entity: "injury",
                    field: "player",
                });
            }
        };
        Ok(NewInjury {
            player,
            status: wire.status,
            description: wire.description,
            reported_at: wire.reported_at,
        })
    }
}

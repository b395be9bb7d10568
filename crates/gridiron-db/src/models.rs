//! Database models

use crate::error::ValidationError;
use crate::utils::{non_blank, parse_datetime_or_now, parse_optional_datetime};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use std::fmt;
use std::str::FromStr;

/// Error type for parsing models from strings
#[derive(Debug, Clone)]
pub enum ParseError {
    InvalidEntityKind(String),
    InvalidGameStatus(String),
    InvalidInjuryStatus(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::InvalidEntityKind(s) => write!(f, "Invalid entity kind: {}", s),
            ParseError::InvalidGameStatus(s) => write!(f, "Invalid game status: {}", s),
            ParseError::InvalidInjuryStatus(s) => write!(f, "Invalid injury status: {}", s),
        }
    }
}

impl std::error::Error for ParseError {}

/// Kind of entity held by the store
///
/// The string form doubles as the cache tag for reads derived from that table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Teams,
    Players,
    Games,
    Injuries,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Teams,
        EntityKind::Players,
        EntityKind::Games,
        EntityKind::Injuries,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Teams => "teams",
            EntityKind::Players => "players",
            EntityKind::Games => "games",
            EntityKind::Injuries => "injuries",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "team" | "teams" => Ok(EntityKind::Teams),
            "player" | "players" => Ok(EntityKind::Players),
            "game" | "games" => Ok(EntityKind::Games),
            "injury" | "injuries" => Ok(EntityKind::Injuries),
            _ => Err(ParseError::InvalidEntityKind(s.to_string())),
        }
    }
}

/// Game status
///
/// Variants are declared in lifecycle order; a stored game only ever moves forward.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    #[serde(alias = "pre", alias = "upcoming")]
    Scheduled,
    #[serde(alias = "in-progress", alias = "inprogress", alias = "live")]
    InProgress,
    #[serde(alias = "completed", alias = "closed", alias = "post")]
    Final,
}

impl GameStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameStatus::Scheduled => "scheduled",
            GameStatus::InProgress => "in_progress",
            GameStatus::Final => "final",
        }
    }

    /// Position in the lifecycle
    pub fn rank(&self) -> u8 {
        match self {
            GameStatus::Scheduled => 0,
            GameStatus::InProgress => 1,
            GameStatus::Final => 2,
        }
    }
}

impl FromStr for GameStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "scheduled" | "pre" | "upcoming" => Ok(GameStatus::Scheduled),
            "in_progress" | "in-progress" | "inprogress" | "live" => Ok(GameStatus::InProgress),
            "final" | "completed" | "closed" | "post" => Ok(GameStatus::Final),
            _ => Err(ParseError::InvalidGameStatus(s.to_string())),
        }
    }
}

/// Injury designation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum InjuryStatus {
    #[serde(alias = "active", alias = "probable")]
    Healthy,
    Questionable,
    Doubtful,
    #[serde(alias = "ir", alias = "injured_reserve")]
    Out,
}

impl InjuryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InjuryStatus::Healthy => "healthy",
            InjuryStatus::Questionable => "questionable",
            InjuryStatus::Doubtful => "doubtful",
            InjuryStatus::Out => "out",
        }
    }
}

impl FromStr for InjuryStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "healthy" | "active" | "probable" => Ok(InjuryStatus::Healthy),
            "questionable" => Ok(InjuryStatus::Questionable),
            "doubtful" => Ok(InjuryStatus::Doubtful),
            "out" | "ir" | "injured_reserve" => Ok(InjuryStatus::Out),
            _ => Err(ParseError::InvalidInjuryStatus(s.to_string())),
        }
    }
}

/// Reference to a team as upstream payloads express it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TeamRef {
    Id(i64),
    ExternalId(String),
    /// Name or abbreviation
    Name(String),
}

impl fmt::Display for TeamRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TeamRef::Id(id) => write!(f, "team #{}", id),
            TeamRef::ExternalId(id) => write!(f, "team external id '{}'", id),
            TeamRef::Name(name) => write!(f, "team '{}'", name),
        }
    }
}

/// Reference to a player as upstream payloads express it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlayerRef {
    Id(i64),
    ExternalId(String),
    NameOnTeam { name: String, team: TeamRef },
}

impl fmt::Display for PlayerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayerRef::Id(id) => write!(f, "player #{}", id),
            PlayerRef::ExternalId(id) => write!(f, "player external id '{}'", id),
            PlayerRef::NameOnTeam { name, team } => write!(f, "player '{}' on {}", name, team),
        }
    }
}

/// Team model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Team {
    pub id: i64,
    pub external_id: Option<String>,
    pub name: String,
    pub abbreviation: Option<String>,
    pub city: Option<String>,
    pub conference: Option<String>,
    pub division: Option<String>,
    pub primary_color: Option<String>,
    pub secondary_color: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// New team (for upsert)
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NewTeam {
    pub external_id: Option<String>,
    pub name: String,
    pub abbreviation: Option<String>,
    pub city: Option<String>,
    pub conference: Option<String>,
    pub division: Option<String>,
    pub primary_color: Option<String>,
    pub secondary_color: Option<String>,
}

impl NewTeam {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingField {
                entity: "team",
                field: "name",
            });
        }
        Ok(())
    }
}

/// Player model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Player {
    pub id: i64,
    pub external_id: Option<String>,
    pub name: String,
    pub position: Option<String>,
    pub team_id: i64,
    pub team_name: String,
    pub jersey_number: Option<i64>,
    pub height: Option<String>,
    pub weight: Option<i64>,
    pub age: Option<i64>,
    pub experience_years: Option<i64>,
    pub college: Option<String>,
    pub status: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// New player (for upsert)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewPlayer {
    pub external_id: Option<String>,
    pub name: String,
    pub position: Option<String>,
    pub team: TeamRef,
    pub jersey_number: Option<i64>,
    pub height: Option<String>,
    pub weight: Option<i64>,
    pub age: Option<i64>,
    pub experience_years: Option<i64>,
    pub college: Option<String>,
    pub status: Option<String>,
}

impl NewPlayer {
    pub fn new(name: impl Into<String>, team: TeamRef) -> Self {
        Self {
            external_id: None,
            name: name.into(),
            position: None,
            team,
            jersey_number: None,
            height: None,
            weight: None,
            age: None,
            experience_years: None,
            college: None,
            status: None,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingField {
                entity: "player",
                field: "name",
            });
        }
        if let Some(number) = self.jersey_number
            && !(0..=99).contains(&number)
        {
            return Err(ValidationError::InvalidField {
                entity: "player",
                field: "jersey_number",
                reason: format!("{} is outside 0-99", number),
            });
        }
        for (field, value) in [
            ("weight", self.weight),
            ("age", self.age),
            ("experience_years", self.experience_years),
        ] {
            if let Some(v) = value
                && v < 0
            {
                return Err(ValidationError::InvalidField {
                    entity: "player",
                    field,
                    reason: format!("{} is negative", v),
                });
            }
        }
        Ok(())
    }

    /// Natural key once the team is resolved: external id when present, else name + team
    pub fn natural_key(&self, team_id: i64) -> String {
        match non_blank(&self.external_id) {
            Some(ext) => format!("ext:{}", ext),
            None => format!("name:{}@{}", crate::utils::normalize_name(&self.name), team_id),
        }
    }
}

/// Game model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Game {
    pub id: i64,
    pub external_id: String,
    pub season: i64,
    pub week: i64,
    pub home_team_id: i64,
    pub home_team: String,
    pub away_team_id: i64,
    pub away_team: String,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub status: GameStatus,
    pub home_score: Option<i64>,
    pub away_score: Option<i64>,
    pub venue: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// New game (for upsert)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewGame {
    pub external_id: String,
    pub season: i64,
    pub week: i64,
    pub home_team: TeamRef,
    pub away_team: TeamRef,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub status: GameStatus,
    pub home_score: Option<i64>,
    pub away_score: Option<i64>,
    pub venue: Option<String>,
}

impl NewGame {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.external_id.trim().is_empty() {
            return Err(ValidationError::MissingField {
                entity: "game",
                field: "external_id",
            });
        }
        if self.season <= 0 {
            return Err(ValidationError::InvalidField {
                entity: "game",
                field: "season",
                reason: format!("{} is not a season", self.season),
            });
        }
        if self.week < 0 {
            return Err(ValidationError::InvalidField {
                entity: "game",
                field: "week",
                reason: format!("{} is negative", self.week),
            });
        }
        for (field, score) in [("home_score", self.home_score), ("away_score", self.away_score)] {
            if let Some(s) = score
                && s < 0
            {
                return Err(ValidationError::InvalidField {
                    entity: "game",
                    field,
                    reason: format!("{} is negative", s),
                });
            }
        }
        Ok(())
    }
}

/// Injury model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Injury {
    pub id: i64,
    pub player_id: i64,
    pub player_name: String,
    pub team_id: i64,
    pub team_name: String,
    pub status: InjuryStatus,
    pub description: Option<String>,
    pub reported_at: DateTime<Utc>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// New injury (for upsert into the current batch)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewInjury {
    pub player: PlayerRef,
    pub status: InjuryStatus,
    pub description: Option<String>,
    pub reported_at: Option<DateTime<Utc>>,
}

impl NewInjury {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let blank = match &self.player {
            PlayerRef::Id(_) => false,
            PlayerRef::ExternalId(ext) => ext.trim().is_empty(),
            PlayerRef::NameOnTeam { name, .. } => name.trim().is_empty(),
        };
        if blank {
            return Err(ValidationError::MissingField {
                entity: "injury",
                field: "player",
            });
        }
        Ok(())
    }
}

/// A normalized record ready for the store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Record {
    Team(NewTeam),
    Player(NewPlayer),
    Game(NewGame),
    Injury(NewInjury),
}

impl Record {
    pub fn kind(&self) -> EntityKind {
        match self {
            Record::Team(_) => EntityKind::Teams,
            Record::Player(_) => EntityKind::Players,
            Record::Game(_) => EntityKind::Games,
            Record::Injury(_) => EntityKind::Injuries,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Record::Team(t) => t.validate(),
            Record::Player(p) => p.validate(),
            Record::Game(g) => g.validate(),
            Record::Injury(i) => i.validate(),
        }
    }
}

/// What an upsert did to the stored row
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UpsertAction {
    Inserted,
    Updated,
    /// Stored state already matched the record
    Unchanged,
    /// The record carried an older game status than the stored one
    StaleIgnored,
}

/// Result of a single upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub id: i64,
    pub action: UpsertAction,
}

impl UpsertOutcome {
    pub fn new(id: i64, action: UpsertAction) -> Self {
        Self { id, action }
    }

    /// Whether the stored row changed
    pub fn wrote(&self) -> bool {
        matches!(self.action, UpsertAction::Inserted | UpsertAction::Updated)
    }
}

/// Sync log entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncLogEntry {
    pub id: i64,
    pub run_id: String,
    pub source: String,
    pub kind: String,
    pub rows_affected: i64,
    pub rows_skipped: i64,
    pub success: bool,
    pub error_message: Option<String>,
    pub duration_ms: i64,
    pub created_at: DateTime<Utc>,
}

/// New sync log entry (for insertion)
#[derive(Debug, Clone, PartialEq)]
pub struct NewSyncLogEntry {
    pub run_id: String,
    pub source: String,
    pub kind: String,
    pub rows_affected: i64,
    pub rows_skipped: i64,
    pub success: bool,
    pub error_message: Option<String>,
    pub duration_ms: i64,
    pub created_at: DateTime<Utc>,
}

// ==================== TryFrom Implementations ====================

impl TryFrom<&sqlx::sqlite::SqliteRow> for Team {
    type Error = sqlx::Error;

    fn try_from(row: &sqlx::sqlite::SqliteRow) -> Result<Self, Self::Error> {
        Ok(Team {
            id: row.try_get("id")?,
            external_id: row.try_get("external_id")?,
            name: row.try_get("name")?,
            abbreviation: row.try_get("abbreviation")?,
            city: row.try_get("city")?,
            conference: row.try_get("conference")?,
            division: row.try_get("division")?,
            primary_color: row.try_get("primary_color")?,
            secondary_color: row.try_get("secondary_color")?,
            created_at: parse_datetime_or_now(&row.try_get::<String, _>("created_at")?),
            updated_at: parse_datetime_or_now(&row.try_get::<String, _>("updated_at")?),
        })
    }
}

impl TryFrom<&sqlx::sqlite::SqliteRow> for Player {
    type Error = sqlx::Error;

    fn try_from(row: &sqlx::sqlite::SqliteRow) -> Result<Self, Self::Error> {
        Ok(Player {
            id: row.try_get("id")?,
            external_id: row.try_get("external_id")?,
            name: row.try_get("name")?,
            position: row.try_get("position")?,
            team_id: row.try_get("team_id")?,
            team_name: row.try_get("team_name")?,
            jersey_number: row.try_get("jersey_number")?,
            height: row.try_get("height")?,
            weight: row.try_get("weight")?,
            age: row.try_get("age")?,
            experience_years: row.try_get("experience_years")?,
            college: row.try_get("college")?,
            status: row.try_get("status")?,
            created_at: parse_datetime_or_now(&row.try_get::<String, _>("created_at")?),
            updated_at: parse_datetime_or_now(&row.try_get::<String, _>("updated_at")?),
        })
    }
}

impl TryFrom<&sqlx::sqlite::SqliteRow> for Game {
    type Error = sqlx::Error;

    fn try_from(row: &sqlx::sqlite::SqliteRow) -> Result<Self, Self::Error> {
        let status_str: String = row.try_get("status")?;
        Ok(Game {
            id: row.try_get("id")?,
            external_id: row.try_get("external_id")?,
            season: row.try_get("season")?,
            week: row.try_get("week")?,
            home_team_id: row.try_get("home_team_id")?,
            home_team: row.try_get("home_team")?,
            away_team_id: row.try_get("away_team_id")?,
            away_team: row.try_get("away_team")?,
            scheduled_at: parse_optional_datetime(row.try_get("scheduled_at")?),
            status: GameStatus::from_str(&status_str).unwrap_or(GameStatus::Scheduled),
            home_score: row.try_get("home_score")?,
            away_score: row.try_get("away_score")?,
            venue: row.try_get("venue")?,
            created_at: parse_datetime_or_now(&row.try_get::<String, _>("created_at")?),
            updated_at: parse_datetime_or_now(&row.try_get::<String, _>("updated_at")?),
        })
    }
}

impl TryFrom<&sqlx::sqlite::SqliteRow> for Injury {
    type Error = sqlx::Error;

    fn try_from(row: &sqlx::sqlite::SqliteRow) -> Result<Self, Self::Error> {
        let status_str: String = row.try_get("status")?;
        Ok(Injury {
            id: row.try_get("id")?,
            player_id: row.try_get("player_id")?,
            player_name: row.try_get("player_name")?,
            team_id: row.try_get("team_id")?,
            team_name: row.try_get("team_name")?,
            status: InjuryStatus::from_str(&status_str).unwrap_or(InjuryStatus::Questionable),
            description: row.try_get("description")?,
            reported_at: parse_datetime_or_now(&row.try_get::<String, _>("reported_at")?),
            active: row.try_get("active")?,
            created_at: parse_datetime_or_now(&row.try_get::<String, _>("created_at")?),
        })
    }
}

impl TryFrom<&sqlx::sqlite::SqliteRow> for SyncLogEntry {
    type Error = sqlx::Error;

    fn try_from(row: &sqlx::sqlite::SqliteRow) -> Result<Self, Self::Error> {
        Ok(SyncLogEntry {
            id: row.try_get("id")?,
            run_id: row.try_get("run_id")?,
            source: row.try_get("source")?,
            kind: row.try_get("kind")?,
            rows_affected: row.try_get("rows_affected")?,
            rows_skipped: row.try_get("rows_skipped")?,
            success: row.try_get("success")?,
            error_message: row.try_get("error_message")?,
            duration_ms: row.try_get("duration_ms")?,
            created_at: parse_datetime_or_now(&row.try_get::<String, _>("created_at")?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_game_status_ordering() {
        assert!(GameStatus::Scheduled < GameStatus::InProgress);
        assert!(GameStatus::InProgress < GameStatus::Final);
        assert_eq!(GameStatus::Final.rank(), 2);
    }

    #[test]
    fn test_game_status_aliases() {
        assert_eq!(GameStatus::from_str("in-progress").unwrap(), GameStatus::InProgress);
        assert_eq!(GameStatus::from_str("LIVE").unwrap(), GameStatus::InProgress);
        assert_eq!(GameStatus::from_str("completed").unwrap(), GameStatus::Final);
        assert!(GameStatus::from_str("postponed").is_err());

        let parsed: GameStatus = serde_json::from_str("\"in-progress\"").unwrap();
        assert_eq!(parsed, GameStatus::InProgress);
        assert_eq!(serde_json::to_string(&parsed).unwrap(), "\"in_progress\"");
    }

    #[test]
    fn test_entity_kind_from_str() {
        assert_eq!(EntityKind::from_str("Teams").unwrap(), EntityKind::Teams);
        assert_eq!(EntityKind::from_str("injury").unwrap(), EntityKind::Injuries);
        assert!(EntityKind::from_str("odds").is_err());
    }

    #[test]
    fn test_player_natural_key() {
        let mut player = NewPlayer::new("Patrick  Mahomes", TeamRef::Name("KC".to_string()));
        assert_eq!(player.natural_key(7), "name:patrick mahomes@7");

        player.external_id = Some("3139477".to_string());
        assert_eq!(player.natural_key(7), "ext:3139477");

        player.external_id = Some("  ".to_string());
        assert_eq!(player.natural_key(7), "name:patrick mahomes@7");
    }

    #[test]
    fn test_player_validation() {
        let mut player = NewPlayer::new("", TeamRef::Id(1));
        assert!(matches!(
            player.validate(),
            Err(ValidationError::MissingField { field: "name", .. })
        ));

        player.name = "Travis Kelce".to_string();
        player.jersey_number = Some(187);
        assert!(matches!(
            player.validate(),
            Err(ValidationError::InvalidField { field: "jersey_number", .. })
        ));

        player.jersey_number = Some(87);
        assert!(player.validate().is_ok());
    }

    #[test]
    fn test_game_validation() {
        let game = NewGame {
            external_id: " ".to_string(),
            season: 2025,
            week: 5,
            home_team: TeamRef::Id(1),
            away_team: TeamRef::Id(2),
            scheduled_at: None,
            status: GameStatus::Scheduled,
            home_score: None,
            away_score: None,
            venue: None,
        };
        assert!(game.validate().is_err());

        let game = NewGame {
            external_id: "G1".to_string(),
            home_score: Some(-3),
            ..game
        };
        assert!(matches!(
            game.validate(),
            Err(ValidationError::InvalidField { field: "home_score", .. })
        ));
    }

    #[test]
    fn test_record_serde_tagging() {
        let record = Record::Team(NewTeam {
            name: "Detroit Lions".to_string(),
            ..Default::default()
        });
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["kind"], "team");
        assert_eq!(record.kind(), EntityKind::Teams);
    }
}

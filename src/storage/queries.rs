//! SQLite implementation of `FamilyStore`

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row, Rows};
use serde::de::{DeserializeOwned, Error as _};

use super::backend::FamilyStore;
use super::connection::Storage;
use super::profiles::symptom_hash;
use crate::error::{HearthError, Result};
use crate::types::*;

const PROFILE_COLUMNS: &str = "id, user_id, name, relationship, age, gender, height, grade, school, \
     work_info, medical_info, diagnoses, challenges, strengths, therapies, medications, \
     parent_goals, parent_notes, ai_observations, symptoms, symptom_hash, diagnostics, \
     created_at, updated_at";

fn corrupt(column: &str, detail: impl std::fmt::Display) -> HearthError {
    HearthError::Serialization(serde_json::Error::custom(format!(
        "column {}: {}",
        column, detail
    )))
}

fn parse_timestamp(column: &str, s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| corrupt(column, e))
}

fn parse_json<T: DeserializeOwned>(column: &str, s: &str) -> Result<T> {
    serde_json::from_str(s).map_err(|e| corrupt(column, e))
}

fn parse_enum<T: FromStr<Err = String>>(column: &str, s: &str) -> Result<T> {
    s.parse().map_err(|e: String| corrupt(column, e))
}

fn json_column<T: DeserializeOwned>(row: &Row, column: &str) -> Result<T> {
    parse_json(column, &row.get::<_, String>(column)?)
}

/// Parse a profile from a database row
///
/// A column that no longer decodes is an error rather than a default, so a
/// later write never persists the loss.
pub fn profile_from_row(row: &Row) -> Result<PersonProfile> {
    let relationship: String = row.get("relationship")?;
    let gender: Option<String> = row.get("gender")?;
    let diagnostics: Option<String> = row.get("diagnostics")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(PersonProfile {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        name: row.get("name")?,
        relationship: parse_enum("relationship", &relationship)?,
        created_at: parse_timestamp("created_at", &created_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
        age: row.get("age")?,
        gender: gender
            .as_deref()
            .map(|g| parse_enum("gender", g))
            .transpose()?,
        height: row.get("height")?,
        grade: row.get("grade")?,
        school: row.get("school")?,
        work_info: row.get("work_info")?,
        medical_info: row.get("medical_info")?,
        diagnoses: json_column(row, "diagnoses")?,
        challenges: json_column(row, "challenges")?,
        strengths: json_column(row, "strengths")?,
        therapies: json_column(row, "therapies")?,
        medications: json_column(row, "medications")?,
        parent_goals: json_column(row, "parent_goals")?,
        parent_notes: json_column(row, "parent_notes")?,
        ai_observations: json_column(row, "ai_observations")?,
        symptoms: json_column(row, "symptoms")?,
        symptom_hash: row.get("symptom_hash")?,
        diagnostics: diagnostics
            .as_deref()
            .map(|d| parse_json("diagnostics", d))
            .transpose()?,
    })
}

fn message_from_row(row: &Row) -> Result<Message> {
    let role: String = row.get("role")?;
    let created_at: String = row.get("created_at")?;
    Ok(Message {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        role: parse_enum("role", &role)?,
        content: row.get("content")?,
        created_at: parse_timestamp("created_at", &created_at)?,
    })
}

fn summary_from_row(row: &Row) -> Result<ConversationSummary> {
    let summary_type: String = row.get("summary_type")?;
    let created_at: String = row.get("created_at")?;
    Ok(ConversationSummary {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        summary_type: parse_enum("summary_type", &summary_type)?,
        range_start: row.get::<_, i64>("range_start")? as u64,
        range_end: row.get::<_, i64>("range_end")? as u64,
        content: row.get("content")?,
        created_at: parse_timestamp("created_at", &created_at)?,
    })
}

/// Decode every row, stopping at the first one that fails
fn collect_rows<T>(mut rows: Rows<'_>, decode: fn(&Row) -> Result<T>) -> Result<Vec<T>> {
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(decode(row)?);
    }
    Ok(out)
}

fn first_row<T>(mut rows: Rows<'_>, decode: fn(&Row) -> Result<T>) -> Result<Option<T>> {
    rows.next()?.map(decode).transpose()
}

fn load_profile(conn: &Connection, id: &str) -> Result<Option<PersonProfile>> {
    let sql = format!("SELECT {} FROM profiles WHERE id = ?", PROFILE_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let result = first_row(stmt.query(params![id])?, profile_from_row);
    result
}

fn insert_profile(conn: &Connection, profile: &PersonProfile) -> Result<()> {
    let diagnostics = profile
        .diagnostics
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    conn.execute(
        "INSERT INTO profiles (id, user_id, name, relationship, age, gender, height, grade, school,
            work_info, medical_info, diagnoses, challenges, strengths, therapies, medications,
            parent_goals, parent_notes, ai_observations, symptoms, symptom_hash, diagnostics,
            created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
            ?18, ?19, ?20, ?21, ?22, ?23, ?24)",
        params![
            profile.id,
            profile.user_id,
            profile.name,
            profile.relationship.as_str(),
            profile.age,
            profile.gender.map(|g| g.as_str()),
            profile.height,
            profile.grade,
            profile.school,
            profile.work_info,
            profile.medical_info,
            serde_json::to_string(&profile.diagnoses)?,
            serde_json::to_string(&profile.challenges)?,
            serde_json::to_string(&profile.strengths)?,
            serde_json::to_string(&profile.therapies)?,
            serde_json::to_string(&profile.medications)?,
            serde_json::to_string(&profile.parent_goals)?,
            serde_json::to_string(&profile.parent_notes)?,
            serde_json::to_string(&profile.ai_observations)?,
            serde_json::to_string(&profile.symptoms)?,
            profile.symptom_hash,
            diagnostics,
            profile.created_at.to_rfc3339(),
            profile.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn write_profile(conn: &Connection, profile: &PersonProfile) -> Result<()> {
    let diagnostics = profile
        .diagnostics
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    conn.execute(
        "UPDATE profiles SET name = ?2, relationship = ?3, age = ?4, gender = ?5, height = ?6,
            grade = ?7, school = ?8, work_info = ?9, medical_info = ?10, diagnoses = ?11,
            challenges = ?12, strengths = ?13, therapies = ?14, medications = ?15,
            parent_goals = ?16, parent_notes = ?17, ai_observations = ?18, symptoms = ?19,
            symptom_hash = ?20, diagnostics = ?21, updated_at = ?22
         WHERE id = ?1",
        params![
            profile.id,
            profile.name,
            profile.relationship.as_str(),
            profile.age,
            profile.gender.map(|g| g.as_str()),
            profile.height,
            profile.grade,
            profile.school,
            profile.work_info,
            profile.medical_info,
            serde_json::to_string(&profile.diagnoses)?,
            serde_json::to_string(&profile.challenges)?,
            serde_json::to_string(&profile.strengths)?,
            serde_json::to_string(&profile.therapies)?,
            serde_json::to_string(&profile.medications)?,
            serde_json::to_string(&profile.parent_goals)?,
            serde_json::to_string(&profile.parent_notes)?,
            serde_json::to_string(&profile.ai_observations)?,
            serde_json::to_string(&profile.symptoms)?,
            profile.symptom_hash,
            diagnostics,
            profile.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn insert_message(conn: &Connection, message: &Message) -> Result<()> {
    conn.execute(
        "INSERT INTO messages (id, user_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            message.id,
            message.user_id,
            message.role.as_str(),
            message.content,
            message.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn insert_summary(conn: &Connection, summary: &ConversationSummary) -> Result<()> {
    conn.execute(
        "INSERT INTO summaries (id, user_id, summary_type, range_start, range_end, content, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            summary.id,
            summary.user_id,
            summary.summary_type.as_str(),
            summary.range_start as i64,
            summary.range_end as i64,
            summary.content,
            summary.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

impl FamilyStore for Storage {
    fn get_profiles(&self, user_id: &str) -> Result<Vec<PersonProfile>> {
        self.with_connection(|conn| {
            let sql = format!(
                "SELECT {} FROM profiles WHERE user_id = ? ORDER BY created_at ASC, name ASC",
                PROFILE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let result = collect_rows(stmt.query(params![user_id])?, profile_from_row);
            result
        })
    }

    fn get_profile(&self, user_id: &str, name: &str) -> Result<Option<PersonProfile>> {
        self.with_connection(|conn| {
            let sql = format!(
                "SELECT {} FROM profiles WHERE user_id = ? AND name = ?",
                PROFILE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let result = first_row(stmt.query(params![user_id, name])?, profile_from_row);
            result
        })
    }

    fn get_profile_by_id(&self, id: &str) -> Result<Option<PersonProfile>> {
        self.with_connection(|conn| load_profile(conn, id))
    }

    fn create_profile(&self, input: &NewProfile) -> Result<PersonProfile> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(HearthError::InvalidInput(
                "profile name cannot be empty".to_string(),
            ));
        }

        let now = Utc::now();
        let mut profile = PersonProfile {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: input.user_id.clone(),
            name: name.to_string(),
            relationship: input.relationship,
            created_at: now,
            updated_at: now,
            age: None,
            gender: None,
            height: None,
            grade: None,
            school: None,
            work_info: None,
            medical_info: None,
            diagnoses: Vec::new(),
            challenges: Vec::new(),
            strengths: Vec::new(),
            therapies: Vec::new(),
            medications: Vec::new(),
            parent_goals: Vec::new(),
            parent_notes: Vec::new(),
            ai_observations: Vec::new(),
            symptoms: SymptomMap::new(),
            symptom_hash: symptom_hash(&SymptomMap::new()),
            diagnostics: None,
        };
        super::profiles::merge_patch(&mut profile, &input.patch, now);

        self.with_transaction(|conn| {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM profiles WHERE user_id = ? AND name = ?)",
                params![profile.user_id, profile.name],
                |row| row.get(0),
            )?;
            if exists {
                return Err(HearthError::InvalidInput(format!(
                    "profile '{}' already exists",
                    profile.name
                )));
            }
            insert_profile(conn, &profile)
        })?;

        Ok(profile)
    }

    fn modify_profile(
        &self,
        id: &str,
        mutate: &mut dyn FnMut(&mut PersonProfile),
    ) -> Result<PersonProfile> {
        self.with_transaction(|conn| {
            let mut profile = load_profile(conn, id)?
                .ok_or_else(|| HearthError::NotFound(format!("profile {}", id)))?;
            mutate(&mut profile);
            profile.id = id.to_string();
            profile.updated_at = Utc::now();
            write_profile(conn, &profile)?;
            Ok(profile)
        })
    }

    fn delete_profile(&self, id: &str) -> Result<()> {
        self.with_connection(|conn| {
            let deleted = conn.execute("DELETE FROM profiles WHERE id = ?", params![id])?;
            if deleted == 0 {
                return Err(HearthError::NotFound(format!("profile {}", id)));
            }
            Ok(())
        })
    }

    fn save_message(&self, message: &Message) -> Result<Message> {
        self.with_connection(|conn| insert_message(conn, message))?;
        Ok(message.clone())
    }

    fn get_messages(&self, user_id: &str, limit: usize) -> Result<Vec<Message>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, role, content, created_at FROM messages
                 WHERE user_id = ? ORDER BY created_at DESC, seq DESC LIMIT ?",
            )?;
            let result = collect_rows(
                stmt.query(params![user_id, limit as i64])?,
                message_from_row,
            );
            result
        })
    }

    fn count_messages(&self, user_id: &str) -> Result<u64> {
        self.with_connection(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE user_id = ?",
                params![user_id],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    fn get_summaries(&self, user_id: &str) -> Result<Vec<ConversationSummary>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, summary_type, range_start, range_end, content, created_at
                 FROM summaries WHERE user_id = ? ORDER BY created_at ASC, seq ASC",
            )?;
            let result = collect_rows(stmt.query(params![user_id])?, summary_from_row);
            result
        })
    }

    fn save_summary(&self, summary: &ConversationSummary) -> Result<()> {
        self.with_connection(|conn| insert_summary(conn, summary))
    }

    fn delete_summary(&self, id: &str) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute("DELETE FROM summaries WHERE id = ?", params![id])?;
            Ok(())
        })
    }

    fn replace_user_data(
        &self,
        user_id: &str,
        profiles: &[PersonProfile],
        messages: &[Message],
        summaries: &[ConversationSummary],
    ) -> Result<()> {
        self.with_transaction(|conn| {
            conn.execute("DELETE FROM profiles WHERE user_id = ?", params![user_id])?;
            conn.execute("DELETE FROM messages WHERE user_id = ?", params![user_id])?;
            conn.execute("DELETE FROM summaries WHERE user_id = ?", params![user_id])?;

            for profile in profiles {
                insert_profile(conn, profile)?;
            }
            for message in messages {
                insert_message(conn, message)?;
            }
            for summary in summaries {
                insert_summary(conn, summary)?;
            }
            Ok(())
        })
    }
}

use anyhow::{bail, Context};
use rusqlite::Connection;
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub id: Uuid,
    pub course_id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Teacher,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
            Role::Admin => "admin",
        }
    }

    fn parse(s: &str) -> anyhow::Result<Role> {
        match s {
            "student" => Ok(Role::Student),
            "teacher" => Ok(Role::Teacher),
            "admin" => Ok(Role::Admin),
            other => bail!("unknown role in catalog: {}", other),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    pub id: Uuid,
    #[serde(default)]
    pub national_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    pub display_name: String,
    pub role: Role,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub student_id: Uuid,
    pub course_id: Uuid,
    pub section_id: Uuid,
}

/// One catalog snapshot. Owned by a single import run once the Translator is
/// built from it; concurrent runs would see each other's stale maps.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Catalogs {
    pub courses: Vec<Course>,
    pub sections: Vec<Section>,
    pub people: Vec<Person>,
    pub enrollments: Vec<Enrollment>,
}

/// Replaces the catalog tables with the supplied snapshot in one transaction.
pub fn replace_in_db(conn: &Connection, catalogs: &Catalogs) -> anyhow::Result<()> {
    for p in &catalogs.people {
        if p.national_id.is_none() && p.username.is_none() {
            bail!(
                "person {} has neither nationalId nor username",
                p.id
            );
        }
    }

    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM enrollments", [])?;
    tx.execute("DELETE FROM people", [])?;
    tx.execute("DELETE FROM sections", [])?;
    tx.execute("DELETE FROM courses", [])?;

    {
        let mut ins = tx.prepare("INSERT INTO courses(id, name) VALUES(?, ?)")?;
        for c in &catalogs.courses {
            ins.execute((c.id.to_string(), &c.name))
                .with_context(|| format!("course {}", c.id))?;
        }

        let mut ins = tx.prepare("INSERT INTO sections(id, course_id, name) VALUES(?, ?, ?)")?;
        for s in &catalogs.sections {
            ins.execute((s.id.to_string(), s.course_id.to_string(), &s.name))
                .with_context(|| format!("section {}", s.id))?;
        }

        let mut ins = tx.prepare(
            "INSERT INTO people(id, national_id, username, display_name, role)
             VALUES(?, ?, ?, ?, ?)",
        )?;
        for p in &catalogs.people {
            ins.execute((
                p.id.to_string(),
                p.national_id.as_deref(),
                p.username.as_deref(),
                &p.display_name,
                p.role.as_str(),
            ))
            .with_context(|| format!("person {}", p.id))?;
        }

        let mut ins = tx.prepare(
            "INSERT INTO enrollments(student_id, course_id, section_id) VALUES(?, ?, ?)",
        )?;
        for e in &catalogs.enrollments {
            ins.execute((
                e.student_id.to_string(),
                e.course_id.to_string(),
                e.section_id.to_string(),
            ))
            .with_context(|| format!("enrollment {}", e.student_id))?;
        }
    }

    tx.commit()?;
    Ok(())
}

fn parse_uuid(s: String) -> anyhow::Result<Uuid> {
    Uuid::parse_str(&s).with_context(|| format!("bad uuid in catalog tables: {}", s))
}

/// Loads the snapshot an import run will resolve against. Called once at run
/// start; the run never re-reads the tables afterwards.
pub fn load_from_db(conn: &Connection) -> anyhow::Result<Catalogs> {
    let mut stmt = conn.prepare("SELECT id, name FROM courses")?;
    let courses = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .map(|(id, name)| Ok(Course { id: parse_uuid(id)?, name }))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let mut stmt = conn.prepare("SELECT id, course_id, name FROM sections")?;
    let sections = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .map(|(id, course_id, name)| {
            Ok(Section {
                id: parse_uuid(id)?,
                course_id: parse_uuid(course_id)?,
                name,
            })
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let mut stmt =
        conn.prepare("SELECT id, national_id, username, display_name, role FROM people")?;
    let people = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, Option<String>>(1)?,
                r.get::<_, Option<String>>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .map(|(id, national_id, username, display_name, role)| {
            Ok(Person {
                id: parse_uuid(id)?,
                national_id,
                username,
                display_name,
                role: Role::parse(&role)?,
            })
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let mut stmt = conn.prepare("SELECT student_id, course_id, section_id FROM enrollments")?;
    let enrollments = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .map(|(student_id, course_id, section_id)| {
            Ok(Enrollment {
                student_id: parse_uuid(student_id)?,
                course_id: parse_uuid(course_id)?,
                section_id: parse_uuid(section_id)?,
            })
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(Catalogs {
        courses,
        sections,
        people,
        enrollments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn temp_workspace(prefix: &str) -> std::path::PathBuf {
        let p = std::env::temp_dir().join(format!(
            "{}-{}",
            prefix,
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&p).expect("create temp dir");
        p
    }

    #[test]
    fn snapshot_round_trips_through_sqlite() {
        let ws = temp_workspace("aulad-catalog");
        let conn = db::open_db(&ws).expect("open db");

        let course_id = Uuid::new_v4();
        let section_id = Uuid::new_v4();
        let ana = Uuid::new_v4();
        let catalogs = Catalogs {
            courses: vec![Course {
                id: course_id,
                name: "1ro Básico".into(),
            }],
            sections: vec![Section {
                id: section_id,
                course_id,
                name: "A".into(),
            }],
            people: vec![Person {
                id: ana,
                national_id: Some("1-9".into()),
                username: None,
                display_name: "Ana Rojas".into(),
                role: Role::Student,
            }],
            enrollments: vec![Enrollment {
                student_id: ana,
                course_id,
                section_id,
            }],
        };

        replace_in_db(&conn, &catalogs).expect("replace");
        let loaded = load_from_db(&conn).expect("load");
        assert_eq!(loaded.courses.len(), 1);
        assert_eq!(loaded.courses[0].name, "1ro Básico");
        assert_eq!(loaded.sections[0].course_id, course_id);
        assert_eq!(loaded.people[0].national_id.as_deref(), Some("1-9"));
        assert_eq!(loaded.people[0].role, Role::Student);
        assert_eq!(loaded.enrollments[0].section_id, section_id);

        // A second load replaces, not appends.
        replace_in_db(&conn, &catalogs).expect("replace again");
        let loaded = load_from_db(&conn).expect("load again");
        assert_eq!(loaded.courses.len(), 1);
        assert_eq!(loaded.people.len(), 1);
    }

    #[test]
    fn person_without_any_identifier_is_rejected() {
        let ws = temp_workspace("aulad-catalog-bad");
        let conn = db::open_db(&ws).expect("open db");
        let catalogs = Catalogs {
            people: vec![Person {
                id: Uuid::new_v4(),
                national_id: None,
                username: None,
                display_name: "Sin Identificador".into(),
                role: Role::Student,
            }],
            ..Default::default()
        };
        assert!(replace_in_db(&conn, &catalogs).is_err());
    }
}

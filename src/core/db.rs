use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::config::*;
use crate::core::errors::AppError;
use crate::core::helpers::{new_id, now_iso, validate_uuid};
use crate::core::store::KvStore;
use crate::models::models::{Comment, Likers, Post, SessionData, User};

/// Typed access to users, posts, comments, likes and sessions.
///
/// Uniqueness of usernames and emails is kept through index keys, and inserts
/// refuse to reference a user or post that does not exist. Every mutation
/// that reads before it writes runs as one atomic section of the store.
pub struct Db<'a> {
    kv: &'a dyn KvStore,
}

impl<'a> Db<'a> {
    pub fn new(kv: &'a dyn KvStore) -> Self {
        Self { kv }
    }

    fn get_json<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<T>> {
        match self.kv.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn set_json<T: Serialize>(&self, key: &str, value: &T) -> anyhow::Result<()> {
        self.kv.set(key, &serde_json::to_vec(value)?)
    }

    fn id_list(&self, key: &str) -> anyhow::Result<Vec<String>> {
        Ok(self.get_json::<Vec<String>>(key)?.unwrap_or_default())
    }

    /// Runs `f` against an exclusive view of the store. An error from `f`
    /// discards every write it made.
    fn atomic<T>(&self, f: impl FnOnce(&Db) -> Result<T, AppError>) -> Result<T, AppError> {
        let mut f = Some(f);
        let mut outcome = None;
        let committed = self.kv.atomically(&mut |kv: &dyn KvStore| -> anyhow::Result<()> {
            let f = f
                .take()
                .ok_or_else(|| anyhow::anyhow!("atomic section entered twice"))?;
            let result = f(&Db::new(kv));
            let failed = result.is_err();
            outcome = Some(result);
            if failed {
                anyhow::bail!("atomic section rolled back");
            }
            Ok(())
        });

        match (outcome, committed) {
            (Some(Err(e)), _) => Err(e),
            (Some(Ok(value)), Ok(())) => Ok(value),
            (_, Err(e)) => Err(e.into()),
            (None, Ok(())) => Err(anyhow::anyhow!("atomic section did not run").into()),
        }
    }

    // === Users ===

    pub fn username_taken(&self, username: &str) -> Result<bool, AppError> {
        Ok(self.kv.get(&username_key(username))?.is_some())
    }

    pub fn email_taken(&self, email: &str) -> Result<bool, AppError> {
        Ok(self.kv.get(&email_key(email))?.is_some())
    }

    pub fn insert_user(&self, username: &str, email: &str, password_hash: &str) -> Result<User, AppError> {
        self.atomic(|db| {
            if db.username_taken(username)? {
                return Err(AppError::Validation(
                    "That username is taken. Please choose a different one.".to_string(),
                ));
            }
            if db.email_taken(email)? {
                return Err(AppError::Validation("That email is already registered.".to_string()));
            }

            let user = User {
                id: new_id(),
                username: username.to_string(),
                email: email.to_string(),
                password: password_hash.to_string(),
                created_at: now_iso(),
            };

            db.set_json(&user_key(&user.id), &user)?;
            db.set_json(&username_key(username), &user.id)?;
            db.set_json(&email_key(email), &user.id)?;
            Ok(user)
        })
    }

    pub fn user_by_id(&self, id: &str) -> Result<Option<User>, AppError> {
        Ok(self.get_json::<User>(&user_key(id))?)
    }

    pub fn user_by_username(&self, username: &str) -> Result<Option<User>, AppError> {
        match self.get_json::<String>(&username_key(username))? {
            Some(id) => self.user_by_id(&id),
            None => Ok(None),
        }
    }

    fn require_user(&self, id: &str) -> Result<User, AppError> {
        self.user_by_id(id)?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }

    /// Display name for a user id; authors are never deleted in practice but
    /// a dangling id still renders.
    pub fn username_of(&self, id: &str) -> Result<String, AppError> {
        Ok(self
            .user_by_id(id)?
            .map(|u| u.username)
            .unwrap_or_else(|| "[deleted]".to_string()))
    }

    // === Posts ===

    pub fn insert_post(&self, user_id: &str, title: &str, content: &str) -> Result<Post, AppError> {
        self.atomic(|db| {
            db.require_user(user_id)?;

            let post = Post {
                id: new_id(),
                user_id: user_id.to_string(),
                title: title.to_string(),
                content: content.to_string(),
                created_at: now_iso(),
                updated_at: None,
            };

            db.set_json(&post_key(&post.id), &post)?;

            let mut feed = db.id_list(FEED_KEY)?;
            feed.insert(0, post.id.clone()); // newest first
            db.set_json(FEED_KEY, &feed)?;

            Ok(post)
        })
    }

    pub fn post_by_id(&self, id: &str) -> Result<Option<Post>, AppError> {
        if !validate_uuid(id) {
            return Ok(None);
        }
        Ok(self.get_json::<Post>(&post_key(id))?)
    }

    pub fn require_post(&self, id: &str) -> Result<Post, AppError> {
        self.post_by_id(id)?.ok_or_else(AppError::post_not_found)
    }

    pub fn update_post(&self, id: &str, title: &str, content: &str) -> Result<Post, AppError> {
        self.atomic(|db| {
            let mut post = db.require_post(id)?;
            post.title = title.to_string();
            post.content = content.to_string();
            post.updated_at = Some(now_iso());

            db.set_json(&post_key(id), &post)?;
            Ok(post)
        })
    }

    /// Removes the post together with its comments and likes.
    pub fn delete_post(&self, id: &str) -> Result<(), AppError> {
        self.atomic(|db| {
            let post = db.require_post(id)?;

            let comment_ids = db.id_list(&post_comments_key(&post.id))?;
            for comment_id in &comment_ids {
                db.kv.delete(&comment_key(comment_id))?;
            }
            db.kv.delete(&post_comments_key(&post.id))?;
            db.kv.delete(&likes_key(&post.id))?;
            db.kv.delete(&post_key(&post.id))?;

            let mut feed = db.id_list(FEED_KEY)?;
            feed.retain(|p| p != &post.id);
            db.set_json(FEED_KEY, &feed)?;

            debug!(post_id = %post.id, comments = comment_ids.len(), "post removed");
            Ok(())
        })
    }

    pub fn all_posts(&self) -> Result<Vec<Post>, AppError> {
        let mut posts = Vec::new();
        for id in self.id_list(FEED_KEY)? {
            if let Some(p) = self.get_json::<Post>(&post_key(&id))? {
                posts.push(p);
            }
        }
        Ok(posts)
    }

    pub fn posts_by_user(&self, user_id: &str) -> Result<Vec<Post>, AppError> {
        Ok(self
            .all_posts()?
            .into_iter()
            .filter(|p| p.user_id == user_id)
            .collect())
    }

    // === Comments ===

    pub fn insert_comment(&self, post_id: &str, user_id: &str, content: &str) -> Result<Comment, AppError> {
        self.atomic(|db| {
            let post = db.require_post(post_id)?;
            db.require_user(user_id)?;

            let comment = Comment {
                id: new_id(),
                post_id: post.id.clone(),
                user_id: user_id.to_string(),
                content: content.to_string(),
                timestamp: now_iso(),
            };

            db.set_json(&comment_key(&comment.id), &comment)?;

            let mut ids = db.id_list(&post_comments_key(&post.id))?;
            ids.push(comment.id.clone());
            db.set_json(&post_comments_key(&post.id), &ids)?;

            Ok(comment)
        })
    }

    /// Comments on a post, oldest first.
    pub fn comments_by_post(&self, post_id: &str) -> Result<Vec<Comment>, AppError> {
        let mut comments = Vec::new();
        for id in self.id_list(&post_comments_key(post_id))? {
            if let Some(c) = self.get_json::<Comment>(&comment_key(&id))? {
                comments.push(c);
            }
        }
        Ok(comments)
    }

    // === Likes ===

    pub fn likers(&self, post_id: &str) -> Result<Likers, AppError> {
        Ok(self.id_list(&likes_key(post_id))?)
    }

    pub fn like_count(&self, post_id: &str) -> Result<usize, AppError> {
        Ok(self.likers(post_id)?.len())
    }

    /// Adds the like when absent, removes it when present. Returns whether the
    /// user likes the post afterwards.
    pub fn toggle_like(&self, user_id: &str, post_id: &str) -> Result<bool, AppError> {
        self.atomic(|db| {
            let post = db.require_post(post_id)?;
            db.require_user(user_id)?;

            let key = likes_key(&post.id);
            let mut likers = db.likers(&post.id)?;
            let liked = if likers.iter().any(|id| id == user_id) {
                likers.retain(|id| id != user_id);
                false
            } else {
                likers.push(user_id.to_string());
                true
            };

            if likers.is_empty() {
                db.kv.delete(&key)?;
            } else {
                db.set_json(&key, &likers)?;
            }
            Ok(liked)
        })
    }

    // === Sessions ===

    pub fn create_session(&self, user_id: Option<&str>) -> Result<(String, SessionData), AppError> {
        let token = new_id();
        let data = SessionData {
            user_id: user_id.map(str::to_string),
            created_at: now_iso(),
            flashes: Vec::new(),
        };
        self.set_json(&session_key(&token), &data)?;
        Ok((token, data))
    }

    /// Looks up a live session. Expired sessions are removed and reported as
    /// absent.
    pub fn session(&self, token: &str) -> Result<Option<SessionData>, AppError> {
        if !validate_uuid(token) {
            return Ok(None);
        }
        let key = session_key(token);
        let Some(data) = self.get_json::<SessionData>(&key)? else {
            return Ok(None);
        };

        if let Ok(created) = chrono::DateTime::parse_from_rfc3339(&data.created_at) {
            let age_hours = (chrono::Utc::now() - created.with_timezone(&chrono::Utc)).num_hours();
            if age_hours > session_expiration_hours() {
                self.kv.delete(&key)?;
                return Ok(None);
            }
        }

        Ok(Some(data))
    }

    pub fn save_session(&self, token: &str, data: &SessionData) -> Result<(), AppError> {
        Ok(self.set_json(&session_key(token), data)?)
    }

    pub fn delete_session(&self, token: &str) -> Result<(), AppError> {
        Ok(self.kv.delete(&session_key(token))?)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::core::store::{MemoryStore, SqliteStore};

    fn user(db: &Db, name: &str) -> User {
        db.insert_user(name, &format!("{}@example.com", name), "hash").unwrap()
    }

    #[test]
    fn duplicate_username_is_rejected() {
        let store = MemoryStore::new();
        let db = Db::new(&store);
        user(&db, "ann");

        let err = db.insert_user("ann", "other@example.com", "hash").unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(db.username_taken("ann").unwrap());
    }

    #[test]
    fn duplicate_email_is_rejected_case_insensitively() {
        let store = MemoryStore::new();
        let db = Db::new(&store);
        user(&db, "ann");

        let err = db.insert_user("bob", "ANN@example.com", "hash").unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(db.user_by_username("bob").unwrap().is_none());
    }

    #[test]
    fn post_requires_existing_author() {
        let store = MemoryStore::new();
        let db = Db::new(&store);

        let err = db.insert_post(&new_id(), "t", "c").unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert!(db.all_posts().unwrap().is_empty());
    }

    #[test]
    fn feed_is_newest_first_and_filters_by_author() {
        let store = MemoryStore::new();
        let db = Db::new(&store);
        let ann = user(&db, "ann");
        let bob = user(&db, "bob");

        let first = db.insert_post(&ann.id, "first", "a").unwrap();
        let second = db.insert_post(&bob.id, "second", "b").unwrap();
        let third = db.insert_post(&ann.id, "third", "c").unwrap();

        let ids: Vec<_> = db.all_posts().unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![third.id.clone(), second.id, first.id.clone()]);

        let anns: Vec<_> = db.posts_by_user(&ann.id).unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(anns, vec![third.id, first.id]);
    }

    #[test]
    fn update_sets_updated_at() {
        let store = MemoryStore::new();
        let db = Db::new(&store);
        let ann = user(&db, "ann");
        let post = db.insert_post(&ann.id, "t", "c").unwrap();
        assert!(post.updated_at.is_none());

        let updated = db.update_post(&post.id, "t2", "c2").unwrap();
        assert_eq!(updated.title, "t2");
        assert!(updated.updated_at.is_some());
        assert_eq!(db.require_post(&post.id).unwrap(), updated);
    }

    #[test]
    fn unknown_or_malformed_post_is_not_found() {
        let store = MemoryStore::new();
        let db = Db::new(&store);
        assert!(matches!(db.require_post(&new_id()), Err(AppError::NotFound(_))));
        assert!(matches!(db.require_post("42"), Err(AppError::NotFound(_))));
    }

    #[test]
    fn like_toggle_twice_restores_unliked_state() {
        let store = MemoryStore::new();
        let db = Db::new(&store);
        let ann = user(&db, "ann");
        let post = db.insert_post(&ann.id, "t", "c").unwrap();

        assert!(db.toggle_like(&ann.id, &post.id).unwrap());
        assert_eq!(db.like_count(&post.id).unwrap(), 1);
        assert_eq!(db.likers(&post.id).unwrap(), vec![ann.id.clone()]);

        assert!(!db.toggle_like(&ann.id, &post.id).unwrap());
        assert_eq!(db.like_count(&post.id).unwrap(), 0);
        assert!(store.get(&likes_key(&post.id)).unwrap().is_none());
    }

    #[test]
    fn likes_are_a_set_per_user() {
        let store = MemoryStore::new();
        let db = Db::new(&store);
        let ann = user(&db, "ann");
        let bob = user(&db, "bob");
        let post = db.insert_post(&ann.id, "t", "c").unwrap();

        db.toggle_like(&ann.id, &post.id).unwrap();
        db.toggle_like(&bob.id, &post.id).unwrap();
        assert_eq!(db.likers(&post.id).unwrap(), vec![ann.id.clone(), bob.id.clone()]);

        db.toggle_like(&ann.id, &post.id).unwrap();
        assert_eq!(db.likers(&post.id).unwrap(), vec![bob.id]);
    }

    #[test]
    fn comment_requires_existing_post() {
        let store = MemoryStore::new();
        let db = Db::new(&store);
        let ann = user(&db, "ann");

        let err = db.insert_comment(&new_id(), &ann.id, "hi").unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn delete_post_cascades_to_comments_and_likes() {
        let store = MemoryStore::new();
        let db = Db::new(&store);
        let ann = user(&db, "ann");
        let post = db.insert_post(&ann.id, "t", "c").unwrap();
        let comment = db.insert_comment(&post.id, &ann.id, "hi").unwrap();
        db.toggle_like(&ann.id, &post.id).unwrap();

        db.delete_post(&post.id).unwrap();

        assert!(db.post_by_id(&post.id).unwrap().is_none());
        assert!(store.get(&comment_key(&comment.id)).unwrap().is_none());
        assert!(db.comments_by_post(&post.id).unwrap().is_empty());
        assert_eq!(db.like_count(&post.id).unwrap(), 0);
        assert!(db.all_posts().unwrap().is_empty());
    }

    #[test]
    fn comments_come_back_oldest_first() {
        let store = MemoryStore::new();
        let db = Db::new(&store);
        let ann = user(&db, "ann");
        let post = db.insert_post(&ann.id, "t", "c").unwrap();
        db.insert_comment(&post.id, &ann.id, "one").unwrap();
        db.insert_comment(&post.id, &ann.id, "two").unwrap();

        let bodies: Vec<_> = db.comments_by_post(&post.id).unwrap().into_iter().map(|c| c.content).collect();
        assert_eq!(bodies, vec!["one", "two"]);
    }

    #[test]
    fn expired_session_is_dropped() {
        let store = MemoryStore::new();
        let db = Db::new(&store);
        let (token, mut data) = db.create_session(Some("someone")).unwrap();
        assert!(db.session(&token).unwrap().is_some());

        data.created_at = (chrono::Utc::now() - chrono::Duration::hours(session_expiration_hours() + 2)).to_rfc3339();
        db.save_session(&token, &data).unwrap();

        assert!(db.session(&token).unwrap().is_none());
        assert!(store.get(&session_key(&token)).unwrap().is_none());
    }

    #[test]
    fn concurrent_posts_all_reach_the_feed() {
        let store = SqliteStore::open_in_memory().unwrap();
        let ann = user(&Db::new(&store), "ann");

        thread::scope(|s| {
            for worker in 0..8 {
                let (store, ann) = (&store, &ann);
                s.spawn(move || {
                    let db = Db::new(store);
                    for n in 0..25 {
                        db.insert_post(&ann.id, &format!("{}-{}", worker, n), "c").unwrap();
                    }
                });
            }
        });

        assert_eq!(Db::new(&store).all_posts().unwrap().len(), 200);
    }

    #[test]
    fn concurrent_registrations_share_no_username() {
        let store = SqliteStore::open_in_memory().unwrap();

        let created = thread::scope(|s| {
            let workers: Vec<_> = (0..8)
                .map(|n| {
                    let store = &store;
                    s.spawn(move || {
                        Db::new(store)
                            .insert_user("ann", &format!("ann{}@example.com", n), "hash")
                            .is_ok()
                    })
                })
                .collect();
            workers
                .into_iter()
                .map(|w| w.join().unwrap())
                .filter(|ok| *ok)
                .count()
        });
        assert_eq!(created, 1);
    }

    #[test]
    fn concurrent_comments_and_likes_are_all_kept() {
        let store = MemoryStore::new();
        let db = Db::new(&store);
        let post_author = user(&db, "author");
        let post = db.insert_post(&post_author.id, "t", "c").unwrap();
        let readers: Vec<User> = (0..6).map(|n| user(&db, &format!("reader{}", n))).collect();

        thread::scope(|s| {
            for reader in &readers {
                let (store, post) = (&store, &post);
                s.spawn(move || {
                    let db = Db::new(store);
                    db.insert_comment(&post.id, &reader.id, "hi").unwrap();
                    db.toggle_like(&reader.id, &post.id).unwrap();
                });
            }
        });

        assert_eq!(db.comments_by_post(&post.id).unwrap().len(), readers.len());
        assert_eq!(db.like_count(&post.id).unwrap(), readers.len());
    }
}

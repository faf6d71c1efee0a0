use sqlrepo::prelude::*;
use sqlrepo_test::{library, Author, Book, MemorySession};

struct Catalog<S: Session> {
    authors: Repository<Author, S>,
    books: Repository<Book, S>,
}

impl<S: Session> RepositorySet<S> for Catalog<S> {
    fn init_repositories(session: &SessionHandle<S>) -> Result<Self, DataError> {
        Ok(Self {
            authors: Repository::new(session.clone())?,
            books: Repository::new(session.clone())?,
        })
    }
}

#[test]
fn test_prelude_covers_a_unit_of_work() {
    let db = library().unwrap();
    let titles: DataResult<Vec<String>> = UnitOfWork::<Catalog<MemorySession>, _>::run(&db.factory(), |c| {
        let cid = c.authors.get(filter! { "name" => "Cid" })?;
        c.books.create(record! { "title" => "Iris", "author_id" => cid.id })?;
        let page = c.books.list_page(
            filter! { "author_id" => cid.id },
            &Pageable::new(0, 10).with_sort("-title"),
        )?;
        Ok(page.content.into_iter().map(|b| b.title).collect())
    });

    assert_eq!(titles.unwrap(), vec!["Iris".to_string(), "Gulf".to_string()]);
    assert_eq!(db.stats().commits, 1);
}

struct AsyncCatalog<S: AsyncSession> {
    authors: AsyncRepository<Author, S>,
    books: AsyncRepository<Book, S>,
}

impl<S: AsyncSession> Clone for AsyncCatalog<S> {
    fn clone(&self) -> Self {
        Self {
            authors: self.authors.clone(),
            books: self.books.clone(),
        }
    }
}

impl<S: AsyncSession> AsyncRepositorySet<S> for AsyncCatalog<S> {
    fn init_repositories(session: &AsyncSessionHandle<S>) -> Result<Self, DataError> {
        Ok(Self {
            authors: AsyncRepository::new(session.clone())?,
            books: AsyncRepository::new(session.clone())?,
        })
    }
}

#[tokio::test]
async fn test_prelude_covers_an_async_unit_of_work() {
    let db = library().unwrap();
    let names = AsyncUnitOfWork::<AsyncCatalog<MemorySession>, _>::run(&db.factory(), |c| async move {
        let ben = c.authors.get(filter! { "name" => "Ben" }).await?;
        c.books
            .create(record! { "title" => "Jade", "author_id" => ben.id })
            .await?;
        let joined = c
            .books
            .list(ListOptions::new().join("author").filter(filter! { "author_id" => ben.id }).order_by("title"))
            .await?;
        DataResult::Ok(joined.into_iter().map(|b| b.title).collect::<Vec<_>>())
    })
    .await
    .unwrap();

    assert_eq!(names, vec!["Fall".to_string(), "Jade".to_string()]);
    assert_eq!(db.stats().commits, 1);
    assert_eq!(db.len::<Book>(), 6);
}

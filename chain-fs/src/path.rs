use alloc::borrow::ToOwned;
use alloc::string::String;
use alloc::vec::Vec;

pub trait Path: ToOwned {
    fn is_absolute(&self) -> bool;

    /// 返回不以`/`结束、不包含`.`与`..`、没有空项的绝对路径。
    /// `..`越过根目录时返回`None`。
    ///
    /// # 参数
    ///
    /// `cwd`: 当前目录，为绝对路径。
    fn canonicalize(&self, cwd: &Self) -> Option<Self::Owned>;

    /// 返回路径的最后一项；根目录没有最后一项
    fn file_name(&self) -> Option<&Self>;

    /// `self`是否为`dir`本身或位于`dir`之下，两者都须是规范路径
    fn is_within(&self, dir: &Self) -> bool;

    fn is_relative(&self) -> bool {
        !self.is_absolute()
    }
}

impl Path for str {
    fn is_absolute(&self) -> bool {
        self.starts_with('/')
    }

    fn canonicalize(&self, cwd: &Self) -> Option<Self::Owned> {
        let mut cmps = Vec::new();
        if self.is_relative() {
            cmps.extend(cwd.split('/').filter(|s| !s.is_empty()));
        }

        for cmp in self.split('/') {
            match cmp {
                ".." => {
                    cmps.pop()?;
                }
                "." | "" => (),
                s => cmps.push(s),
            }
        }

        if cmps.is_empty() {
            return Some(String::from("/"));
        }

        let mut path = String::new();
        for cmp in cmps {
            path.push('/');
            path.push_str(cmp);
        }
        Some(path)
    }

    fn file_name(&self) -> Option<&Self> {
        let file_name = self.rsplit_once('/').map_or(self, |(_, f)| f);
        (!file_name.is_empty()).then_some(file_name)
    }

    fn is_within(&self, dir: &Self) -> bool {
        if dir == "/" {
            return true;
        }
        self.strip_prefix(dir)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize() {
        assert_eq!(Some("/".into()), "/".canonicalize("/"));
        assert_eq!(Some("/a/b".into()), "//a///b/".canonicalize("/"));
        assert_eq!(Some("/usr/bin".into()), "bin".canonicalize("/usr"));
        assert_eq!(Some("/etc".into()), "../etc/.".canonicalize("/usr"));
        assert_eq!(Some("/usr".into()), "".canonicalize("/usr"));
        assert_eq!(None, "../..".canonicalize("/usr"));
    }

    #[test]
    fn components() {
        assert_eq!(Some("c"), "/a/b/c".file_name());
        assert_eq!(Some("a"), "a".file_name());
        assert_eq!(None, "/".file_name());

        assert!("/a/b".is_within("/a"));
        assert!("/a".is_within("/a"));
        assert!("/a".is_within("/"));
        assert!(!"/ab".is_within("/a"));
    }
}
